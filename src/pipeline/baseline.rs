//! Curated fallback checklist.
//!
//! Used when the model produces nothing usable, so the basic stage can
//! always deliver a checklist. Deadlines follow the statutory periods for
//! each procedure, counted from the date of death.

use crate::model::{Priority, TaskCategory};

use super::TaskDraft;

const BASELINE: [(&str, &str, TaskCategory, Priority, i64); 8] = [
    (
        "死亡届の提出",
        "市区町村役場の戸籍窓口に7日以内に提出します。医師の死亡診断書を添付します。",
        TaskCategory::Administrative,
        Priority::High,
        7,
    ),
    (
        "火葬許可申請",
        "死亡届と同時に市区町村役場へ申請し、火葬許可証の交付を受けます。",
        TaskCategory::Administrative,
        Priority::High,
        7,
    ),
    (
        "健康保険・介護保険の資格喪失手続き",
        "市区町村役場または勤務先で資格喪失届を提出し、保険証を返却します。",
        TaskCategory::Insurance,
        Priority::High,
        10,
    ),
    (
        "年金受給停止の手続き",
        "年金事務所または年金相談センターに受給権者死亡届を提出します。",
        TaskCategory::Pension,
        Priority::High,
        14,
    ),
    (
        "世帯主変更届の提出",
        "故人が世帯主だった場合、市区町村役場に14日以内に届け出ます。",
        TaskCategory::Administrative,
        Priority::Medium,
        14,
    ),
    (
        "相続放棄・限定承認の検討",
        "負債が残る場合は3か月以内に家庭裁判所での手続きが必要です。相続財産と遺言書を確認します。",
        TaskCategory::Inheritance,
        Priority::Medium,
        90,
    ),
    (
        "所得税の準確定申告",
        "故人に申告が必要な所得があった場合、4か月以内に税務署へ申告します。",
        TaskCategory::Tax,
        Priority::Medium,
        120,
    ),
    (
        "相続税の申告・納付",
        "課税対象となる場合、10か月以内に税務署へ申告・納付します。",
        TaskCategory::Tax,
        Priority::Medium,
        300,
    ),
];

pub(super) fn baseline_drafts() -> Vec<TaskDraft> {
    BASELINE
        .iter()
        .map(|(title, description, category, priority, due_days)| TaskDraft {
            title: (*title).to_string(),
            description: Some((*description).to_string()),
            category: *category,
            priority: *priority,
            due_days: Some(*due_days),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_covers_the_statutory_procedures() {
        let drafts = baseline_drafts();
        assert_eq!(drafts.len(), 8);
        assert_eq!(drafts[0].title, "死亡届の提出");
        assert_eq!(drafts[0].due_days, Some(7));
        assert!(drafts.iter().all(|d| !d.title.is_empty()));
        // Ordered by deadline so display order matches urgency.
        let days: Vec<i64> = drafts.iter().filter_map(|d| d.due_days).collect();
        let mut sorted = days.clone();
        sorted.sort_unstable();
        assert_eq!(days, sorted);
    }
}
