use serde::{Deserialize, Serialize};

/// Classification of a query, selecting section priorities in the
/// synthesizer. `Auto` asks the classifier to decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Explain,
    Debug,
    Extend,
    Review,
    Locate,
    General,
    Auto,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Explain => "explain",
            TaskType::Debug => "debug",
            TaskType::Extend => "extend",
            TaskType::Review => "review",
            TaskType::Locate => "locate",
            TaskType::General => "general",
            TaskType::Auto => "auto",
        }
    }
}

/// A context-bundle section, in the vocabulary the synthesizer assembles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Header,
    Signature,
    Docstring,
    Source,
    Callers,
    Callees,
    Inherits,
    Imports,
    RecentChanges,
    Impact,
    Evidence,
}

/// Section order per task type, highest priority first. The header always
/// leads; lower-priority sections are the first dropped under budget.
pub fn section_priorities(task: TaskType) -> &'static [Section] {
    use Section::*;
    match task {
        TaskType::Explain => &[Signature, Docstring, Source, Callers, Callees, Inherits],
        TaskType::Debug => &[Source, Callers, RecentChanges, Callees],
        TaskType::Extend => &[Signature, Source, Callers, Inherits, Imports],
        TaskType::Review => &[Source, Callers, Callees, RecentChanges, Impact],
        TaskType::Locate => &[Signature, Docstring],
        TaskType::General | TaskType::Auto => {
            &[Signature, Docstring, Source, Callers, Callees]
        }
    }
}

/// Keyword groups per task; each hit adds its weight, highest total wins.
const EXPLAIN_KEYWORDS: &[(&str, u32)] = &[
    ("explain", 10),
    ("how does", 10),
    ("how do", 10),
    ("walk through", 10),
    ("describe", 10),
    ("what happens", 10),
    ("why", 6),
    ("flow", 5),
    ("mechanism", 5),
    ("architecture", 5),
    ("work", 5),
    ("understand", 3),
    ("overview", 3),
];

const DEBUG_KEYWORDS: &[(&str, u32)] = &[
    ("debug", 10),
    ("bug", 10),
    ("error", 10),
    ("exception", 10),
    ("crash", 10),
    ("broken", 10),
    ("fail", 8),
    ("not working", 8),
    ("fix", 6),
    ("traceback", 5),
    ("stack trace", 5),
];

const EXTEND_KEYWORDS: &[(&str, u32)] = &[
    ("add", 8),
    ("implement", 8),
    ("create", 8),
    ("extend", 8),
    ("modify", 8),
    ("new feature", 7),
    ("where should", 5),
    ("best place", 5),
];

const REVIEW_KEYWORDS: &[(&str, u32)] = &[
    ("review", 10),
    ("audit", 10),
    ("assess", 10),
    ("changed", 6),
    ("diff", 6),
    ("commit", 6),
    ("coverage", 5),
    ("security", 5),
];

const LOCATE_KEYWORDS: &[(&str, u32)] = &[
    ("where is", 10),
    ("where are", 10),
    ("find", 10),
    ("locate", 10),
    ("defined", 6),
    ("declared", 6),
    ("show me", 3),
    ("list", 3),
];

/// Classify a query by lightweight keyword heuristics.
/// Returns the winning task type and a confidence in [0, 1];
/// no hits at all means (General, 0.0).
pub fn classify_query(query: &str) -> (TaskType, f32) {
    let lowered = query.to_lowercase();
    let tables: [(TaskType, &[(&str, u32)]); 5] = [
        (TaskType::Explain, EXPLAIN_KEYWORDS),
        (TaskType::Debug, DEBUG_KEYWORDS),
        (TaskType::Extend, EXTEND_KEYWORDS),
        (TaskType::Review, REVIEW_KEYWORDS),
        (TaskType::Locate, LOCATE_KEYWORDS),
    ];

    let mut scores: Vec<(TaskType, u32)> = tables
        .iter()
        .map(|(task, keywords)| {
            let score = keywords
                .iter()
                .filter(|(keyword, _)| lowered.contains(keyword))
                .map(|(_, weight)| weight)
                .sum();
            (*task, score)
        })
        .collect();
    scores.sort_by(|a, b| b.1.cmp(&a.1));

    let (best, best_score) = scores[0];
    if best_score == 0 {
        return (TaskType::General, 0.0);
    }
    let runner_up = scores[1].1;
    // confidence grows with absolute evidence and with the gap to the
    // second-best task
    let base = (best_score as f32 / 20.0).min(1.0);
    let gap = 1.0 - runner_up as f32 / best_score as f32;
    let confidence = (base * (0.7 + 0.3 * gap)).min(1.0);
    (best, confidence)
}

/// Resolve `Auto` through the classifier; other values pass through.
pub fn resolve_task_type(requested: TaskType, query: &str) -> TaskType {
    if requested == TaskType::Auto {
        classify_query(query).0
    } else {
        requested
    }
}
