//! Checklist text commands and message rendering.
//!
//! Parsing is strict keyword matching with full-width digits folded, so a
//! chat question that merely contains the word 完了 is still routed to the
//! AI rather than mis-read as a command.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::{GenerationStep, Priority, Stage, StepStatus, Task};
use crate::util::fold_zenkaku_digits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ListTasks,
    /// Complete the N-th open task as displayed by the list command.
    CompleteByNumber(usize),
    Progress,
    Help,
}

static COMPLETE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^完了\s*([0-9]{1,3})$").unwrap());

pub fn parse_command(text: &str) -> Option<Command> {
    let folded = fold_zenkaku_digits(text.trim());
    match folded.as_str() {
        "一覧" | "リスト" | "チェックリスト" | "list" => return Some(Command::ListTasks),
        "進捗" | "ステータス" | "status" => return Some(Command::Progress),
        "ヘルプ" | "使い方" | "help" => return Some(Command::Help),
        _ => {}
    }
    let caps = COMPLETE_RE.captures(&folded)?;
    let number: usize = caps.get(1)?.as_str().parse().ok()?;
    if number == 0 {
        return None;
    }
    Some(Command::CompleteByNumber(number))
}

fn due_label(task: &Task) -> String {
    match task.due_date {
        Some(date) => format!("（期限: {}）", date.format("%-m月%-d日")),
        None => String::new(),
    }
}

fn priority_mark(task: &Task) -> &'static str {
    match task.priority {
        Priority::High => "⚠ ",
        Priority::Medium | Priority::Low => "",
    }
}

/// Numbered open-task list; the numbers feed the 完了N command.
pub fn render_task_list(tasks: &[Task]) -> String {
    if tasks.is_empty() {
        return "未完了のタスクはありません。お疲れさまでした。".to_string();
    }
    let mut out = String::from("現在のチェックリストです。\n");
    for (i, task) in tasks.iter().enumerate() {
        out.push_str(&format!(
            "{}. {}{}{}\n",
            i + 1,
            priority_mark(task),
            task.title,
            due_label(task)
        ));
    }
    out.push_str("\n完了したタスクは「完了 番号」と送信してください。");
    out
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Basic => "基本チェックリスト",
        Stage::Personalized => "追加タスク",
        Stage::Enhanced => "補足情報",
    }
}

fn status_label(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "待機中",
        StepStatus::InProgress => "作成中",
        StepStatus::Completed => "完了",
        StepStatus::Failed => "失敗（再試行できます）",
    }
}

/// Generation progress per stage plus open/closed task counts.
pub fn render_progress(steps: &[GenerationStep], open: usize, completed: usize) -> String {
    let mut out = String::from("作成状況:\n");
    if steps.is_empty() {
        out.push_str("チェックリストはまだ作成されていません。\n");
    }
    for step in steps {
        out.push_str(&format!(
            "・{}: {}\n",
            stage_label(step.stage),
            status_label(step.status)
        ));
    }
    out.push_str(&format!("タスク: 未完了 {open} 件 / 完了 {completed} 件"));
    out
}

/// Push notification body for a finished basic stage: total count plus the
/// first few items so the message is useful on its own.
pub fn completion_summary(tasks: &[Task]) -> String {
    let mut out = format!(
        "チェックリストを作成しました（全{}件）。まずはこちらから:\n",
        tasks.len()
    );
    for (i, task) in tasks.iter().take(5).enumerate() {
        out.push_str(&format!("{}. {}{}\n", i + 1, task.title, due_label(task)));
    }
    out.push_str("「一覧」と送信すると全体を確認できます。");
    out
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    use crate::model::TaskCategory;

    use super::*;

    #[test]
    fn keywords_parse_to_commands() {
        assert_eq!(parse_command("一覧"), Some(Command::ListTasks));
        assert_eq!(parse_command(" リスト "), Some(Command::ListTasks));
        assert_eq!(parse_command("進捗"), Some(Command::Progress));
        assert_eq!(parse_command("ヘルプ"), Some(Command::Help));
    }

    #[test]
    fn complete_accepts_half_and_full_width_numbers() {
        assert_eq!(parse_command("完了1"), Some(Command::CompleteByNumber(1)));
        assert_eq!(parse_command("完了 12"), Some(Command::CompleteByNumber(12)));
        assert_eq!(parse_command("完了３"), Some(Command::CompleteByNumber(3)));
        assert_eq!(parse_command("完了　５"), Some(Command::CompleteByNumber(5)));
    }

    #[test]
    fn chat_text_is_not_a_command() {
        for text in [
            "年金の手続きが完了したか不安です",
            "完了",
            "完了0",
            "一覧を見せて",
            "完了 abc",
        ] {
            assert_eq!(parse_command(text), None, "{text:?}");
        }
    }

    fn task(title: &str, due: Option<(i32, u32, u32)>, priority: Priority) -> Task {
        Task {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            group_id: None,
            title: title.to_string(),
            description: None,
            category: TaskCategory::Administrative,
            priority,
            due_date: due.map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap()),
            display_order: 1,
            stage: Stage::Basic,
            notes: None,
            is_completed: false,
            completed_at: None,
            is_deleted: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn task_list_is_numbered_with_due_dates() {
        let tasks = vec![
            task("死亡届の提出", Some((2024, 1, 22)), Priority::High),
            task("年金受給停止の手続き", None, Priority::Medium),
        ];
        let rendered = render_task_list(&tasks);
        assert!(rendered.contains("1. ⚠ 死亡届の提出（期限: 1月22日）"));
        assert!(rendered.contains("2. 年金受給停止の手続き\n"));
        assert!(rendered.contains("完了 番号"));
    }

    #[test]
    fn empty_list_has_a_friendly_message() {
        assert!(render_task_list(&[]).contains("未完了のタスクはありません"));
    }

    #[test]
    fn progress_shows_stage_status() {
        let steps = vec![GenerationStep {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            stage: Stage::Basic,
            status: StepStatus::Failed,
            error_message: Some("completion timed out".to_string()),
            started_at: None,
            completed_at: None,
            updated_at: Utc::now(),
        }];
        let rendered = render_progress(&steps, 3, 1);
        assert!(rendered.contains("基本チェックリスト: 失敗"));
        assert!(rendered.contains("未完了 3 件 / 完了 1 件"));
    }

    #[test]
    fn summary_lists_at_most_five_items() {
        let tasks: Vec<Task> = (1..=8)
            .map(|i| task(&format!("タスク{i}"), None, Priority::Medium))
            .collect();
        let rendered = completion_summary(&tasks);
        assert!(rendered.contains("全8件"));
        assert!(rendered.contains("5. タスク5"));
        assert!(!rendered.contains("6. タスク6"));
    }
}
