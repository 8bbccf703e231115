use crate::models::domain::{Question, Test, TestStatus};

#[cfg(test)]
pub mod fixtures {
    use super::*;

    /// A fresh, unsubmitted test.
    pub fn pending_test() -> Test {
        Test::new("student-42", "L3", "U7")
    }

    /// A test that already passed Part 1 with the given score.
    pub fn part1_done_test(part1_score: f64) -> Test {
        let mut test = pending_test();
        test.part1_score = Some(part1_score);
        test.status = TestStatus::Part1Done;
        test
    }

    pub fn questions(count: i32) -> Vec<Question> {
        (1..=count)
            .map(|no| Question {
                no,
                question: format!("Question number {}?", no),
                reference_answer: (no % 2 == 0).then(|| format!("Answer {}", no)),
            })
            .collect()
    }

    /// A well-formed reading-engine XML payload scoring 80 overall.
    pub fn reading_xml() -> &'static str {
        r#"<?xml version="1.0"?><result><rec_paper><read_chapter accuracy_score="82.0" fluency_score="76.0" integrity_score="100.0" phone_score="81.0" total_score="80.0" is_rejected="false" content="cat dog bird"><sentence><word content="cat" total_score="90.0" dp_message="0"/><word content="dog" total_score="70.0" dp_message="0"/><word content="bird" total_score="0.0" dp_message="16"/></sentence></read_chapter></rec_paper></result>"#
    }

    /// A grading-model JSON document scoring 18 overall with one item.
    pub fn dialogue_json() -> String {
        serde_json::json!({
            "transcript": "Um, I like, uh, cats.",
            "total_score": 18.0,
            "fluency_score": 15.0,
            "pronunciation_score": 22.0,
            "confidence_score": 16.0,
            "vocabulary_score": 18.0,
            "sentence_score": 19.0,
            "items": [
                {"no": 1, "score": 1, "feedback": "Hesitant but relevant.", "evidence": "I like cats."}
            ],
            "suggestions": ["Practice answering without fillers."]
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use crate::models::domain::TestStatus;
    use crate::services::result_parser;

    #[test]
    fn test_fixture_payloads_parse() {
        let reading = result_parser::parse_reading_payload(reading_xml()).unwrap();
        assert_eq!(reading.total_score, 80.0);

        let dialogue = result_parser::parse_dialogue_payload(&dialogue_json(), 1).unwrap();
        assert_eq!(dialogue.total_score, 18.0);
    }

    #[test]
    fn test_fixture_statuses() {
        assert_eq!(pending_test().status, TestStatus::Pending);
        assert_eq!(part1_done_test(80.0).status, TestStatus::Part1Done);
        assert_eq!(questions(3).len(), 3);
    }
}
