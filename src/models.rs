use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use serde_with::{serde_as, skip_serializing_none, TimestampSeconds};
use thiserror::Error;

use crate::strings;

pub const ATTEMPT_MAX: i32 = 5;
pub const ATTEMPT_UNLIMITED: i32 = 0;

pub const TIME_FACTOR: i64 = 300;
pub const TIME_MAX: i64 = 14_400;
pub const TIME_UNLIMITED: i32 = 6;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} code {code}")]
pub struct CodeError {
    pub kind: &'static str,
    pub code: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "i32", into = "i32")]
pub enum GradePolicy {
    Average,
    Best,
    Worst,
    Last,
}

impl GradePolicy {
    pub fn code(self) -> i32 {
        match self {
            GradePolicy::Average => 1,
            GradePolicy::Best => 2,
            GradePolicy::Worst => 3,
            GradePolicy::Last => 4,
        }
    }
}

impl TryFrom<i32> for GradePolicy {
    type Error = CodeError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(GradePolicy::Average),
            2 => Ok(GradePolicy::Best),
            3 => Ok(GradePolicy::Worst),
            4 => Ok(GradePolicy::Last),
            _ => Err(CodeError { kind: "grade policy", code }),
        }
    }
}

impl From<GradePolicy> for i32 {
    fn from(p: GradePolicy) -> i32 {
        p.code()
    }
}

/// How the unpacked project is presented to the student.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "i32", into = "i32")]
pub enum ViewMode {
    Inline,
    NewTab,
    Popup,
}

impl ViewMode {
    pub fn code(self) -> i32 {
        match self {
            ViewMode::Inline => 4,
            ViewMode::NewTab => 5,
            ViewMode::Popup => 6,
        }
    }
}

impl TryFrom<i32> for ViewMode {
    type Error = CodeError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            4 => Ok(ViewMode::Inline),
            5 => Ok(ViewMode::NewTab),
            6 => Ok(ViewMode::Popup),
            _ => Err(CodeError { kind: "view mode", code }),
        }
    }
}

impl From<ViewMode> for i32 {
    fn from(v: ViewMode) -> i32 {
        v.code()
    }
}

/// Exercise kinds produced by Visual Class projects.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "i32", into = "i32")]
pub enum ItemType {
    MultipleChoice,
    FillInTheBlank,
    GradedLabel,
    GradedImage,
    DragDropImage,
    DragDrop,
    DragDropMismatch,
    RotateFigures,
    ConnectDots,
    Quiz,
}

impl ItemType {
    pub fn code(self) -> i32 {
        match self {
            ItemType::MultipleChoice => 1,
            ItemType::FillInTheBlank => 2,
            ItemType::GradedLabel => 3,
            ItemType::GradedImage => 4,
            ItemType::DragDropImage => 5,
            ItemType::DragDrop => 6,
            ItemType::DragDropMismatch => 7,
            ItemType::RotateFigures => 8,
            ItemType::ConnectDots => 9,
            ItemType::Quiz => 10,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ItemType::MultipleChoice => "Multiple choice",
            ItemType::FillInTheBlank => "Fill in the blanks",
            ItemType::GradedLabel => "Graded label",
            ItemType::GradedImage => "Graded image",
            ItemType::DragDropImage => "Drag and drop image",
            ItemType::DragDrop => "Drag and drop",
            ItemType::DragDropMismatch => "Drag and drop (mismatch)",
            ItemType::RotateFigures => "Rotate figures",
            ItemType::ConnectDots => "Connect the dots",
            ItemType::Quiz => "Quiz",
        }
    }
}

impl TryFrom<i32> for ItemType {
    type Error = CodeError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Ok(match code {
            1 => ItemType::MultipleChoice,
            2 => ItemType::FillInTheBlank,
            3 => ItemType::GradedLabel,
            4 => ItemType::GradedImage,
            5 => ItemType::DragDropImage,
            6 => ItemType::DragDrop,
            7 => ItemType::DragDropMismatch,
            8 => ItemType::RotateFigures,
            9 => ItemType::ConnectDots,
            10 => ItemType::Quiz,
            _ => return Err(CodeError { kind: "item type", code }),
        })
    }
}

impl From<ItemType> for i32 {
    fn from(t: ItemType) -> i32 {
        t.code()
    }
}

/// Expected answer of a session item.
///
/// Strings, numbers and booleans arrive as `Scalar`, arrays as `List`,
/// anything else is kept verbatim as `Opaque`.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum AnswerValue {
    Scalar(String),
    List(Vec<String>),
    Opaque(Value),
}

impl<'de> Deserialize<'de> for AnswerValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(AnswerValue::from_json(Value::deserialize(deserializer)?))
    }
}

impl AnswerValue {
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Array(items) => {
                AnswerValue::List(items.into_iter().map(scalar_text).collect())
            }
            Value::Object(_) | Value::Null => AnswerValue::Opaque(value),
            other => AnswerValue::Scalar(scalar_text(other)),
        }
    }
}

fn scalar_text(v: Value) -> String {
    match v {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

pub(crate) fn deserialize_user_answer<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(v) => Some(scalar_text(v)),
    })
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionItem {
    pub id: Option<i64>,
    pub sessionid: i64,
    pub pagetitle: Option<String>,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub question: Option<String>,
    pub answercorrect: Option<AnswerValue>,
    #[serde(default, deserialize_with = "deserialize_user_answer")]
    pub answeruser: Option<String>,
}

impl SessionItem {
    pub fn is_correct(&self) -> bool {
        let input = match self.answeruser.as_deref() {
            Some(s) if !s.is_empty() => s,
            _ => return false,
        };
        let Some(answer) = &self.answercorrect else {
            return false;
        };

        let fold = |s: &str| {
            if self.item_type == ItemType::FillInTheBlank {
                s.to_owned()
            } else {
                s.to_lowercase()
            }
        };
        match answer {
            AnswerValue::Scalar(expected) => fold(expected) == fold(input),
            AnswerValue::List(accepted) => {
                let input = fold(input);
                accepted.iter().any(|a| fold(a) == input)
            }
            AnswerValue::Opaque(expected) => serde_json::from_str::<Value>(input)
                .map(|parsed| &parsed == expected)
                .unwrap_or(false),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.item_type.label()
    }

    pub fn answeruser_name(&self) -> String {
        match self.item_type {
            ItemType::MultipleChoice => choice_letter(self.answeruser.as_deref()),
            _ => match self.answeruser.as_deref() {
                // list answers arrive from the player as JSON arrays
                Some(raw) if raw.starts_with('[') => match serde_json::from_str::<Value>(raw) {
                    Ok(Value::Array(items)) => items
                        .into_iter()
                        .map(scalar_text)
                        .collect::<Vec<_>>()
                        .join(strings::get("report_separator")),
                    _ => raw.to_string(),
                },
                Some(raw) => raw.to_string(),
                None => String::new(),
            },
        }
    }

    pub fn answercorrect_name(&self) -> String {
        match (&self.answercorrect, self.item_type) {
            (Some(AnswerValue::Scalar(s)), ItemType::MultipleChoice) => choice_letter(Some(s.as_str())),
            (_, ItemType::MultipleChoice) => choice_letter(None),
            (Some(AnswerValue::Scalar(s)), _) => s.clone(),
            (Some(AnswerValue::List(items)), _) => items.join(strings::get("report_separator")),
            (Some(AnswerValue::Opaque(v)), _) => v.to_string(),
            (None, _) => String::new(),
        }
    }

    pub fn is_correct_name(&self) -> &'static str {
        if self.is_correct() {
            strings::get("report_iscorrect")
        } else {
            strings::get("report_iswrong")
        }
    }
}

fn choice_letter(answer: Option<&str>) -> String {
    let letter = match answer.map(str::trim) {
        Some("1") => "a",
        Some("2") => "b",
        Some("3") => "c",
        Some("4") => "d",
        Some("5") => "e",
        _ => strings::get("noanswer"),
    };
    letter.to_string()
}

#[serde_as]
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Session {
    pub id: Option<i64>,
    pub userid: i64,
    pub modid: i64,
    pub attemptnumber: i32,
    #[serde_as(as = "Option<TimestampSeconds<i64>>")]
    pub timestart: Option<DateTime<Utc>>,
    #[serde_as(as = "Option<TimestampSeconds<i64>>")]
    pub timestop: Option<DateTime<Utc>>,
    #[serde(default)]
    pub totalscore: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<SessionItem>,
}

impl Session {
    pub fn new(userid: i64, modid: i64, attemptnumber: i32) -> Self {
        Self {
            id: None,
            userid,
            modid,
            attemptnumber,
            timestart: None,
            timestop: None,
            totalscore: 0.0,
            items: Vec::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.timestop.is_some()
    }

    pub fn correct_answers(&self) -> usize {
        let n = self.items.len() as f64;
        ((self.totalscore / 100.0) * n).round().clamp(0.0, n) as usize
    }

    pub fn wrong_answers(&self) -> usize {
        self.items.len() - self.correct_answers()
    }

    /// Seconds between start and stop, when both are known.
    pub fn time(&self) -> Option<i64> {
        match (self.timestart, self.timestop) {
            (Some(start), Some(stop)) => Some((stop - start).num_seconds()),
            _ => None,
        }
    }
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Instance {
    pub id: Option<i64>,
    pub course: i64,
    pub name: String,
    pub projectdata: Option<String>,
    pub projecturl: Option<String>,
    pub projectsubject: Option<String>,
    pub policyattempts: i32,
    pub policytime: i32,
    pub policygrades: GradePolicy,
    pub policyview: ViewMode,
    pub policyview_width: i32,
    pub policyview_height: i32,
    pub hidegrade: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sessions: Vec<Session>,
}

impl Instance {
    pub fn new(course: i64, name: impl Into<String>) -> Self {
        Self {
            id: None,
            course,
            name: name.into(),
            projectdata: None,
            projecturl: None,
            projectsubject: None,
            policyattempts: ATTEMPT_UNLIMITED,
            policytime: TIME_UNLIMITED,
            policygrades: GradePolicy::Last,
            policyview: ViewMode::Inline,
            policyview_width: 800,
            policyview_height: 600,
            hidegrade: false,
            sessions: Vec::new(),
        }
    }

    /// Next attempt number for `user` over the loaded sessions.
    pub fn next_attempt_number(&self, user: i64) -> i32 {
        self.sessions
            .iter()
            .filter(|s| s.userid == user)
            .map(|s| s.attemptnumber)
            .max()
            .unwrap_or(0)
            + 1
    }

    pub fn attempts_used(&self, user: i64) -> usize {
        self.sessions.iter().filter(|s| s.userid == user).count()
    }

    pub fn attempts_exhausted(&self, user: i64) -> bool {
        self.policyattempts > ATTEMPT_UNLIMITED
            && self.attempts_used(user) >= self.policyattempts as usize
    }

    /// Time limit in seconds, `None` when unlimited.
    pub fn time_limit(&self) -> Option<i64> {
        if self.policytime == TIME_UNLIMITED || self.policytime <= 0 {
            None
        } else {
            Some((i64::from(self.policytime) * TIME_FACTOR).min(TIME_MAX))
        }
    }
}

/// Host course, as far as the listing page needs it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Course {
    pub id: i64,
    pub fullname: String,
    pub format: String,
}

/// One activity placement in a course, joined with its instance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CourseActivity {
    pub coursemodule: i64,
    pub instance: i64,
    pub name: String,
    pub section: i32,
    pub visible: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(item_type: ItemType, correct: AnswerValue, user: Option<&str>) -> SessionItem {
        SessionItem {
            id: None,
            sessionid: 1,
            pagetitle: None,
            item_type,
            question: None,
            answercorrect: Some(correct),
            answeruser: user.map(str::to_owned),
        }
    }

    #[test]
    fn comparison_ignores_case_except_fill_in_the_blank() {
        let quiz = item(ItemType::Quiz, AnswerValue::Scalar("Paris".into()), Some("PARIS"));
        assert!(quiz.is_correct());

        let fill = item(
            ItemType::FillInTheBlank,
            AnswerValue::Scalar("Paris".into()),
            Some("paris"),
        );
        assert!(!fill.is_correct());

        let fill_exact = item(
            ItemType::FillInTheBlank,
            AnswerValue::Scalar("Paris".into()),
            Some("Paris"),
        );
        assert!(fill_exact.is_correct());
    }

    #[test]
    fn empty_or_missing_input_is_wrong() {
        assert!(!item(ItemType::Quiz, AnswerValue::Scalar(String::new()), Some("")).is_correct());
        assert!(!item(ItemType::Quiz, AnswerValue::Scalar("a".into()), None).is_correct());
    }

    #[test]
    fn zero_is_a_real_answer() {
        let it: SessionItem = serde_json::from_value(json!({
            "sessionid": 3,
            "type": 3,
            "answercorrect": 0,
            "answeruser": 0
        }))
        .unwrap();
        assert_eq!(it.answeruser.as_deref(), Some("0"));
        assert!(it.is_correct());
    }

    #[test]
    fn list_answers_use_membership() {
        let it = item(
            ItemType::DragDrop,
            AnswerValue::List(vec!["Red".into(), "Blue".into()]),
            Some("blue"),
        );
        assert!(it.is_correct());
        let miss = item(
            ItemType::DragDrop,
            AnswerValue::List(vec!["Red".into(), "Blue".into()]),
            Some("green"),
        );
        assert!(!miss.is_correct());
    }

    #[test]
    fn opaque_answers_compare_structurally() {
        let expected = AnswerValue::from_json(json!({"x": 1, "y": [2, 3]}));
        assert!(matches!(expected, AnswerValue::Opaque(_)));
        let ok = item(ItemType::ConnectDots, expected.clone(), Some(r#"{"y":[2,3],"x":1}"#));
        assert!(ok.is_correct());
        let bad = item(ItemType::ConnectDots, expected, Some(r#"{"x":2}"#));
        assert!(!bad.is_correct());
    }

    #[test]
    fn multiple_choice_answers_display_as_letters() {
        let it = item(ItemType::MultipleChoice, AnswerValue::Scalar("3".into()), Some("1"));
        assert_eq!(it.answercorrect_name(), "c");
        assert_eq!(it.answeruser_name(), "a");
        let none = item(ItemType::MultipleChoice, AnswerValue::Scalar("9".into()), None);
        assert_eq!(none.answeruser_name(), strings::get("noanswer"));
        assert_eq!(none.answercorrect_name(), strings::get("noanswer"));
    }

    #[test]
    fn list_user_answers_display_joined() {
        let it: SessionItem = serde_json::from_value(json!({
            "sessionid": 3,
            "type": 6,
            "answercorrect": ["red", "blue"],
            "answeruser": ["blue", 2]
        }))
        .unwrap();
        assert_eq!(it.answeruser_name(), "blue, 2");
        assert_eq!(it.answercorrect_name(), "red, blue");

        let plain = item(ItemType::Quiz, AnswerValue::Scalar("x".into()), Some("[not a list"));
        assert_eq!(plain.answeruser_name(), "[not a list");
    }

    #[test]
    fn next_attempt_number_is_per_user() {
        let mut inst = Instance::new(1, "demo");
        assert_eq!(inst.next_attempt_number(7), 1);
        inst.sessions.push(Session::new(7, 1, 1));
        inst.sessions.push(Session::new(7, 1, 2));
        inst.sessions.push(Session::new(8, 1, 5));
        assert_eq!(inst.next_attempt_number(7), 3);
        assert_eq!(inst.next_attempt_number(8), 6);
        assert_eq!(inst.next_attempt_number(9), 1);
    }

    #[test]
    fn attempt_limit_counts_user_sessions() {
        let mut inst = Instance::new(1, "demo");
        inst.policyattempts = 2;
        inst.sessions.push(Session::new(7, 1, 1));
        assert!(!inst.attempts_exhausted(7));
        inst.sessions.push(Session::new(7, 1, 2));
        assert!(inst.attempts_exhausted(7));
        assert!(!inst.attempts_exhausted(8));
    }

    #[test]
    fn time_limit_scales_and_caps() {
        let mut inst = Instance::new(1, "demo");
        assert_eq!(inst.time_limit(), None);
        inst.policytime = 2;
        assert_eq!(inst.time_limit(), Some(600));
        inst.policytime = 100;
        assert_eq!(inst.time_limit(), Some(TIME_MAX));
    }

    #[test]
    fn session_summary_counts() {
        let mut s = Session::new(1, 1, 1);
        s.totalscore = 50.0;
        for _ in 0..4 {
            s.items.push(item(ItemType::Quiz, AnswerValue::Scalar("a".into()), Some("a")));
        }
        assert_eq!(s.correct_answers(), 2);
        assert_eq!(s.wrong_answers(), 2);
        assert_eq!(s.time(), None);
    }

    #[test]
    fn unknown_codes_are_rejected() {
        assert!(ItemType::try_from(11).is_err());
        assert_eq!(GradePolicy::try_from(2), Ok(GradePolicy::Best));
        assert!(serde_json::from_value::<ViewMode>(json!(1)).is_err());
    }
}
