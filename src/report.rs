use serde::Deserialize;

use crate::html::{self, Table};
use crate::models::Instance;
use crate::strings;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportKind {
    #[serde(rename = "ruser")]
    #[default]
    ByUser,
    #[serde(rename = "rquestion")]
    ByQuestion,
}

pub fn render(instance: &Instance, kind: ReportKind) -> String {
    let body = if instance.sessions.is_empty() {
        format!("<p>{}</p>", html::escape(strings::get("nosessions")))
    } else {
        match kind {
            ReportKind::ByUser => by_user(instance),
            ReportKind::ByQuestion => by_question(instance),
        }
    };
    html::page(&instance.name, &body)
}

fn by_user(instance: &Instance) -> String {
    let mut table = Table {
        head: [
            "report_user",
            "report_attempt",
            "report_timestart",
            "report_time",
            "report_score",
            "report_correct",
            "report_wrong",
        ]
        .iter()
        .map(|k| strings::get(k).to_string())
        .collect(),
        align: vec!["left", "center", "left", "right", "right", "right", "right"],
        data: Vec::new(),
    };

    let mut sessions: Vec<_> = instance.sessions.iter().collect();
    sessions.sort_by_key(|s| (s.userid, s.attemptnumber));
    for s in sessions {
        table.data.push(vec![
            s.userid.to_string(),
            s.attemptnumber.to_string(),
            s.timestart
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            s.time().map(|t| t.to_string()).unwrap_or_default(),
            format!("{:.1}", s.totalscore),
            s.correct_answers().to_string(),
            s.wrong_answers().to_string(),
        ]);
    }
    format!("<h2>{}</h2>\n{}", html::escape(strings::get("report_byuser")), table.render())
}

fn by_question(instance: &Instance) -> String {
    let mut table = Table {
        head: [
            "report_user",
            "report_attempt",
            "report_page",
            "report_type",
            "report_question",
            "report_answercorrect",
            "report_answeruser",
            "report_result",
        ]
        .iter()
        .map(|k| strings::get(k).to_string())
        .collect(),
        align: Vec::new(),
        data: Vec::new(),
    };

    let mut rows: Vec<_> = instance
        .sessions
        .iter()
        .flat_map(|s| s.items.iter().map(move |i| (s, i)))
        .collect();
    rows.sort_by(|(sa, ia), (sb, ib)| {
        (ia.question.as_deref(), sa.userid, sa.attemptnumber, ia.id)
            .cmp(&(ib.question.as_deref(), sb.userid, sb.attemptnumber, ib.id))
    });
    for (s, item) in rows {
        table.data.push(vec![
            s.userid.to_string(),
            s.attemptnumber.to_string(),
            html::escape(item.pagetitle.as_deref().unwrap_or_default()),
            html::escape(item.type_name()),
            html::escape(item.question.as_deref().unwrap_or_default()),
            html::escape(&item.answercorrect_name()),
            html::escape(&item.answeruser_name()),
            html::escape(item.is_correct_name()),
        ]);
    }
    format!("<h2>{}</h2>\n{}", html::escape(strings::get("report_byquestion")), table.render())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnswerValue, ItemType, Session, SessionItem};
    use chrono::{TimeZone, Utc};

    fn instance() -> Instance {
        let mut inst = Instance::new(1, "Quiz");
        let mut s = Session::new(4, 1, 1);
        s.id = Some(1);
        s.totalscore = 50.0;
        s.timestart = Some(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
        s.timestop = Some(Utc.with_ymd_and_hms(2024, 1, 1, 9, 2, 0).unwrap());
        for (id, user) in [(1, "1"), (2, "4")] {
            s.items.push(SessionItem {
                id: Some(id),
                sessionid: 1,
                pagetitle: Some("Intro".into()),
                item_type: ItemType::MultipleChoice,
                question: Some(format!("<Q{id}>")),
                answercorrect: Some(AnswerValue::Scalar("1".into())),
                answeruser: Some(user.into()),
            });
        }
        inst.sessions.push(s);
        inst
    }

    #[test]
    fn user_report_summarizes_sessions() {
        let page = render(&instance(), ReportKind::ByUser);
        assert!(page.contains(">120</td>"));
        assert!(page.contains(">50.0</td>"));
        assert!(page.contains("2024-01-01 09:00:00"));
    }

    #[test]
    fn question_report_lists_items() {
        let page = render(&instance(), ReportKind::ByQuestion);
        assert!(page.contains("&lt;Q1&gt;"));
        assert!(page.contains(">Correct</td>"));
        assert!(page.contains(">Wrong</td>"));
        assert!(page.contains(">d</td>"));
    }

    #[test]
    fn empty_instance_says_so() {
        let page = render(&Instance::new(1, "Quiz"), ReportKind::ByQuestion);
        assert!(page.contains(strings::get("nosessions")));
    }

    #[test]
    fn kind_parses_from_query_values() {
        let k: ReportKind = serde_json::from_str("\"rquestion\"").unwrap();
        assert_eq!(k, ReportKind::ByQuestion);
    }
}
