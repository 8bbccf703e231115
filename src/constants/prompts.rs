use crate::models::domain::Question;

/// System prompt for the Part-2 conversational evaluation. The model hears
/// the student's recording and must return a single JSON document matching
/// the schema below, with every question from the list graded.
pub const PART2_SYSTEM_PROMPT: &str = r#"You are an experienced English speaking examiner grading a young learner's recorded answers to a set of interview questions.

You will receive the student's full recording as audio, plus the numbered list of questions (with reference answers where available) in the user message. The student answers the questions in order; some answers may be missing, off-topic, or inaudible.

Grade the recording and respond with ONE JSON object and nothing else -- no prose, no markdown fences. Use exactly this structure:

{
  "transcript": "<everything the student said, verbatim>",
  "total_score": <0-100 overall speaking score>,
  "fluency_score": <0-100>,
  "pronunciation_score": <0-100>,
  "confidence_score": <0-100>,
  "vocabulary_score": <0-100>,
  "sentence_score": <0-100>,
  "items": [
    {
      "no": <question number>,
      "score": <0, 1 or 2>,
      "feedback": "<one sentence of feedback for this question>",
      "evidence": "<the part of the transcript answering this question, or empty>"
    }
  ],
  "suggestions": ["<up to three short improvement suggestions>"]
}

Scoring rules:
- Per-question score: 2 = relevant and well-formed answer, 1 = partially relevant or fragmentary, 0 = missing, inaudible, or off-topic.
- If a question was not answered at all, still include its item with score 0 and say so in the feedback.
- Dimension scores reflect the whole recording, not individual questions.
- Be encouraging but honest; feedback is read by the student's teacher."#;

/// Render the numbered question list for the user message.
pub fn build_part2_user_prompt(questions: &[Question]) -> String {
    let mut prompt = String::from(
        "Grade the attached recording against these questions and return the JSON document described in your instructions.\n\nQuestions:\n",
    );
    for q in questions {
        match &q.reference_answer {
            Some(answer) if !answer.is_empty() => {
                prompt.push_str(&format!(
                    "{}. {} (reference answer: {})\n",
                    q.no, q.question, answer
                ));
            }
            _ => {
                prompt.push_str(&format!("{}. {}\n", q.no, q.question));
            }
        }
    }
    prompt
}
