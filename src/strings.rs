//! English string table for user-facing text.

/// Looks up `key`; an unknown key is returned unchanged so it shows up on
/// the page.
pub fn get(key: &str) -> &str {
    match key {
        "modulename" => "Visual Class",
        "modulenameplural" => "Visual Class activities",
        "novisualclasss" => "There are no Visual Class activities in this course",
        "week" => "Week",
        "topic" => "Topic",
        "name" => "Name",
        "noanswer" => "No answer",
        "report_separator" => ", ",
        "report_iscorrect" => "Correct",
        "report_iswrong" => "Wrong",
        "report_user" => "User",
        "report_attempt" => "Attempt",
        "report_timestart" => "Started",
        "report_time" => "Time (s)",
        "report_score" => "Score",
        "report_correct" => "Correct answers",
        "report_wrong" => "Wrong answers",
        "report_page" => "Page",
        "report_type" => "Type",
        "report_question" => "Question",
        "report_answercorrect" => "Correct answer",
        "report_answeruser" => "User answer",
        "report_result" => "Result",
        "report_byuser" => "Attempts by user",
        "report_byquestion" => "Answers by question",
        "nosessions" => "No attempts yet",
        "opennewtab" => "Open the activity in a new tab",
        "openpopup" => "Open the activity in a popup window",
        "backtocourse" => "Back to course",
        _ => {
            tracing::warn!(key, "missing string");
            key
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_key_comes_back_verbatim() {
        assert_eq!(get("no_such_key"), "no_such_key");
    }

    #[test]
    fn page_keys_are_defined() {
        let used = std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/src/listing.rs")).unwrap()
            + &std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/src/report.rs")).unwrap()
            + &std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/src/models.rs")).unwrap()
            + &std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/src/routes.rs")).unwrap();
        let mut keys: Vec<&str> = used
            .match_indices("strings::get(\"")
            .map(|(at, m)| {
                let rest = &used[at + m.len()..];
                &rest[..rest.find('"').unwrap_or(0)]
            })
            .collect();
        // report headers are looked up through a list of keys
        keys.extend(used.match_indices("\"report_").map(|(at, _)| {
            let rest = &used[at + 1..];
            &rest[..rest.find('"').unwrap_or(0)]
        }));
        assert!(keys.len() > 20);
        for key in keys {
            assert_ne!(get(key), key, "string {key:?} is not defined");
        }
    }
}
