use chrono::Utc;
use serde_json::json;

use crate::models::domain::{
    DialogueEvaluation, PartUsage, ReadingEvaluation, Test, TestItem, TestStatus, TokenUsage,
};

// Provider list prices, CNY per 1000 tokens.
const PRICE_TEXT_INPUT_PER_1K: f64 = 0.0018;
const PRICE_AUDIO_INPUT_PER_1K: f64 = 0.0158;
const PRICE_OUTPUT_PER_1K: f64 = 0.0127;

/// Map a 0-100 total score to a 1-5 star level.
pub fn star_level(total_score: f64) -> i32 {
    match total_score {
        s if s >= 90.0 => 5,
        s if s >= 80.0 => 4,
        s if s >= 60.0 => 3,
        s if s >= 40.0 => 2,
        _ => 1,
    }
}

/// Price one provider call from its usage metering. When the provider does
/// not split prompt tokens into audio and text, the whole prompt is billed
/// at the audio rate (the conservative side, audio dominates our prompts).
pub fn estimate_cost(usage: &TokenUsage) -> PartUsage {
    let (audio_tokens, text_tokens) =
        if usage.prompt_audio_tokens == 0 && usage.prompt_text_tokens == 0 {
            (usage.prompt_tokens, 0)
        } else {
            (usage.prompt_audio_tokens, usage.prompt_text_tokens)
        };

    let cost = text_tokens as f64 / 1000.0 * PRICE_TEXT_INPUT_PER_1K
        + audio_tokens as f64 / 1000.0 * PRICE_AUDIO_INPUT_PER_1K
        + usage.completion_tokens as f64 / 1000.0 * PRICE_OUTPUT_PER_1K;

    PartUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        audio_tokens,
        text_tokens,
        total_tokens: usage.total_tokens,
        cost,
    }
}

/// Apply a Part-1 reading evaluation to the test. Overwrites any previous
/// Part-1 result, so redelivered tasks converge to the same state.
pub fn apply_part1(test: &mut Test, audio_url: &str, eval: &ReadingEvaluation, raw: &str) {
    test.part1_score = Some(eval.total_score);
    test.part1_audio_url = Some(audio_url.to_string());
    test.part1_raw_result = Some(json!({
        "evaluation": eval,
        "payload": raw,
    }));
    test.status = TestStatus::Part1Done;
    test.failure_reason = None;
    test.updated_at = Utc::now();
}

/// Apply a Part-2 dialogue evaluation and finalize the test. Returns the
/// per-question item rows to persist. Overwrites any previous Part-2 result.
pub fn apply_part2(
    test: &mut Test,
    audio_url: &str,
    eval: &DialogueEvaluation,
    raw: &str,
) -> Vec<TestItem> {
    test.part2_score = Some(eval.total_score);
    test.part2_transcript = Some(eval.transcript.clone());
    test.part2_audio_url = Some(audio_url.to_string());
    test.part2_raw_result = Some(json!({
        "evaluation": eval,
        "payload": raw,
    }));
    test.updated_at = Utc::now();

    // The test only completes once both halves are in. Part-2 tasks are only
    // enqueued after Part-1 finished, so the score is normally present.
    if let Some(part1) = test.part1_score {
        let total = (part1 + eval.total_score) / 2.0;
        test.total_score = Some(total);
        test.star_level = Some(star_level(total));
        test.status = TestStatus::Completed;
        test.failure_reason = None;
        test.completed_at = Some(Utc::now());
    } else {
        log::warn!(
            "test {} graded part 2 without a part 1 score, leaving incomplete",
            test.id
        );
    }

    eval.items
        .iter()
        .map(|item| TestItem::new(&test.id, item.no, item.score, &item.feedback, &item.evidence))
        .collect()
}

/// Fold one task's provider usage into the test's cost ledger.
///
/// The per-part slot is overwritten and the rollup recomputed from the
/// slots; tasks already in `processed_task_ids` are skipped entirely, so a
/// redelivered task never double-counts.
pub fn apply_part2_usage(test: &mut Test, task_id: &str, usage: &TokenUsage) {
    if test.tokens_used.has_processed(task_id) {
        log::info!(
            "test {} already accounted task {}, skipping cost",
            test.id,
            task_id
        );
        return;
    }
    test.tokens_used.part2 = Some(estimate_cost(usage));
    test.tokens_used.total_cost = test.tokens_used.part1.as_ref().map_or(0.0, |p| p.cost)
        + test.tokens_used.part2.as_ref().map_or(0.0, |p| p.cost);
    test.tokens_used
        .processed_task_ids
        .push(task_id.to_string());
}
