//! Course page listing every activity instance.

use crate::html::{self, Table};
use crate::models::{Course, CourseActivity};
use crate::strings;

pub fn view_url(activity: &CourseActivity) -> String {
    format!("/view/{}", activity.instance)
}

/// Renders the listing body for `course`.
pub fn render(course: &Course, activities: &[CourseActivity]) -> String {
    if activities.is_empty() {
        let notice = format!(
            "<div class=\"notice\"><p>{}</p><p>{}</p></div>",
            html::escape(strings::get("novisualclasss")),
            html::link(&format!("/course/{}", course.id), strings::get("backtocourse"), None)
        );
        return html::page(&course.fullname, &notice);
    }

    let sectioned = matches!(course.format.as_str(), "weeks" | "topics");
    let mut table = Table::default();
    match course.format.as_str() {
        "weeks" => {
            table.head = vec![strings::get("week").into(), strings::get("name").into()];
            table.align = vec!["center", "left"];
        }
        "topics" => {
            table.head = vec![strings::get("topic").into(), strings::get("name").into()];
            table.align = vec!["center", "left"];
        }
        _ => {
            table.head = vec![strings::get("name").into()];
            table.align = vec!["left"];
        }
    }

    for activity in activities {
        let class = (!activity.visible).then_some("dimmed");
        let link = html::link(&view_url(activity), &activity.name, class);
        if sectioned {
            table.data.push(vec![activity.section.to_string(), link]);
        } else {
            table.data.push(vec![link]);
        }
    }

    let body = format!(
        "<h2>{}</h2>\n{}",
        html::escape(strings::get("modulenameplural")),
        table.render()
    );
    html::page(&course.fullname, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course(format: &str) -> Course {
        Course { id: 2, fullname: "Biology <101>".into(), format: format.into() }
    }

    fn activities() -> Vec<CourseActivity> {
        vec![
            CourseActivity { coursemodule: 10, instance: 1, name: "Cells".into(), section: 1, visible: true },
            CourseActivity { coursemodule: 11, instance: 2, name: "DNA".into(), section: 2, visible: false },
        ]
    }

    #[test]
    fn weeks_layout_has_week_column() {
        let page = render(&course("weeks"), &activities());
        assert!(page.contains(">Week</th>"));
        assert!(page.contains("<td style=\"text-align:center\">2</td>"));
        assert!(page.contains("<a href=\"/view/1\">Cells</a>"));
        assert!(page.contains("<a href=\"/view/2\" class=\"dimmed\">DNA</a>"));
        assert!(page.contains("Biology &lt;101&gt;"));
    }

    #[test]
    fn topics_layout_has_topic_column() {
        let page = render(&course("topics"), &activities());
        assert!(page.contains(">Topic</th>"));
        assert!(!page.contains(">Week</th>"));
    }

    #[test]
    fn other_layouts_only_list_names() {
        let page = render(&course("social"), &activities());
        assert!(!page.contains(">Topic</th>"));
        assert!(!page.contains(">Week</th>"));
        assert!(page.contains(">Name</th>"));
        assert!(!page.contains(">1</td>"));
    }

    #[test]
    fn empty_course_shows_notice() {
        let page = render(&course("weeks"), &[]);
        assert!(page.contains(strings::get("novisualclasss")));
        assert!(page.contains("href=\"/course/2\""));
        assert!(!page.contains("<table"));
    }
}
