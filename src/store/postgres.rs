use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;

use super::{Store, StoreError};
use crate::db::Db;
use crate::models::{AnswerValue, Course, CourseActivity, Instance, Session, SessionItem};

const INSTANCE_COLUMNS: &str = "id, course, name, projectdata, projecturl, projectsubject, \
     policyattempts, policytime, policygrades, policyview, policyview_width, policyview_height, hidegrade";
const SESSION_COLUMNS: &str = "id, userid, modid, attemptnumber, timestart, timestop, totalscore";
const ITEM_COLUMNS: &str = "id, sessionid, pagetitle, type, question, answercorrect, answeruser";

#[derive(Clone)]
pub struct PgStore {
    pool: Db,
}

impl PgStore {
    pub fn new(pool: Db) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(d) if d.constraint().is_some() => StoreError::Constraint(d.to_string()),
        _ => StoreError::Connection(e.to_string()),
    }
}

fn ser<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Serialization(e.to_string())
}

fn instance_from_row(row: &PgRow) -> Result<Instance, StoreError> {
    Ok(Instance {
        id: Some(row.try_get("id").map_err(ser)?),
        course: row.try_get("course").map_err(ser)?,
        name: row.try_get("name").map_err(ser)?,
        projectdata: row.try_get("projectdata").map_err(ser)?,
        projecturl: row.try_get("projecturl").map_err(ser)?,
        projectsubject: row.try_get("projectsubject").map_err(ser)?,
        policyattempts: row.try_get("policyattempts").map_err(ser)?,
        policytime: row.try_get("policytime").map_err(ser)?,
        policygrades: row.try_get::<i32, _>("policygrades").map_err(ser)?.try_into().map_err(ser)?,
        policyview: row.try_get::<i32, _>("policyview").map_err(ser)?.try_into().map_err(ser)?,
        policyview_width: row.try_get("policyview_width").map_err(ser)?,
        policyview_height: row.try_get("policyview_height").map_err(ser)?,
        hidegrade: row.try_get("hidegrade").map_err(ser)?,
        sessions: Vec::new(),
    })
}

fn session_from_row(row: &PgRow) -> Result<Session, StoreError> {
    Ok(Session {
        id: Some(row.try_get("id").map_err(ser)?),
        userid: row.try_get("userid").map_err(ser)?,
        modid: row.try_get("modid").map_err(ser)?,
        attemptnumber: row.try_get("attemptnumber").map_err(ser)?,
        timestart: row.try_get("timestart").map_err(ser)?,
        timestop: row.try_get("timestop").map_err(ser)?,
        totalscore: row.try_get("totalscore").map_err(ser)?,
        items: Vec::new(),
    })
}

fn item_from_row(row: &PgRow) -> Result<SessionItem, StoreError> {
    let answercorrect = decode_answer(row.try_get("answercorrect").map_err(ser)?)?;
    Ok(SessionItem {
        id: Some(row.try_get("id").map_err(ser)?),
        sessionid: row.try_get("sessionid").map_err(ser)?,
        pagetitle: row.try_get("pagetitle").map_err(ser)?,
        item_type: row.try_get::<i32, _>("type").map_err(ser)?.try_into().map_err(ser)?,
        question: row.try_get("question").map_err(ser)?,
        answercorrect,
        answeruser: row.try_get("answeruser").map_err(ser)?,
    })
}

fn encode_answer(item: &SessionItem) -> Result<Option<String>, StoreError> {
    item.answercorrect.as_ref().map(serde_json::to_string).transpose().map_err(ser)
}

fn decode_answer(raw: Option<String>) -> Result<Option<AnswerValue>, StoreError> {
    raw.map(|raw| serde_json::from_str::<AnswerValue>(&raw))
        .transpose()
        .map_err(ser)
}

fn require_id(id: Option<i64>, table: &str) -> Result<i64, StoreError> {
    id.ok_or_else(|| StoreError::Constraint(format!("{table}: update without id")))
}

#[async_trait]
impl Store for PgStore {
    async fn get_instance(&self, id: i64) -> Result<Option<Instance>, StoreError> {
        let row = sqlx::query(&format!("SELECT {INSTANCE_COLUMNS} FROM visualclass WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(instance_from_row).transpose()
    }

    async fn insert_instance(&self, i: &Instance) -> Result<i64, StoreError> {
        sqlx::query_scalar(
            r#"
            INSERT INTO visualclass (course, name, projectdata, projecturl, projectsubject,
                policyattempts, policytime, policygrades, policyview, policyview_width,
                policyview_height, hidegrade)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            RETURNING id
            "#,
        )
        .bind(i.course)
        .bind(&i.name)
        .bind(&i.projectdata)
        .bind(&i.projecturl)
        .bind(&i.projectsubject)
        .bind(i.policyattempts)
        .bind(i.policytime)
        .bind(i.policygrades.code())
        .bind(i.policyview.code())
        .bind(i.policyview_width)
        .bind(i.policyview_height)
        .bind(i.hidegrade)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn update_instance(&self, i: &Instance) -> Result<(), StoreError> {
        let id = require_id(i.id, "visualclass")?;
        sqlx::query(
            r#"
            UPDATE visualclass SET course=$2, name=$3, projectdata=$4, projecturl=$5,
                projectsubject=$6, policyattempts=$7, policytime=$8, policygrades=$9,
                policyview=$10, policyview_width=$11, policyview_height=$12, hidegrade=$13
            WHERE id=$1
            "#,
        )
        .bind(id)
        .bind(i.course)
        .bind(&i.name)
        .bind(&i.projectdata)
        .bind(&i.projecturl)
        .bind(&i.projectsubject)
        .bind(i.policyattempts)
        .bind(i.policytime)
        .bind(i.policygrades.code())
        .bind(i.policyview.code())
        .bind(i.policyview_width)
        .bind(i.policyview_height)
        .bind(i.hidegrade)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_instance(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM visualclass WHERE id=$1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_session(&self, id: i64) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM visualclass_session WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn insert_session(&self, s: &Session) -> Result<i64, StoreError> {
        sqlx::query_scalar(
            r#"
            INSERT INTO visualclass_session (userid, modid, attemptnumber, timestart, timestop, totalscore)
            VALUES ($1,$2,$3,$4,$5,$6)
            RETURNING id
            "#,
        )
        .bind(s.userid)
        .bind(s.modid)
        .bind(s.attemptnumber)
        .bind(s.timestart)
        .bind(s.timestop)
        .bind(s.totalscore)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn update_session(&self, s: &Session) -> Result<(), StoreError> {
        let id = require_id(s.id, "visualclass_session")?;
        sqlx::query(
            r#"
            UPDATE visualclass_session SET userid=$2, modid=$3, attemptnumber=$4,
                timestart=$5, timestop=$6, totalscore=$7
            WHERE id=$1
            "#,
        )
        .bind(id)
        .bind(s.userid)
        .bind(s.modid)
        .bind(s.attemptnumber)
        .bind(s.timestart)
        .bind(s.timestop)
        .bind(s.totalscore)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_session(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM visualclass_session WHERE id=$1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn sessions_for_instance(&self, modid: i64) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM visualclass_session WHERE modid = $1 ORDER BY id DESC"
        ))
        .bind(modid)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(session_from_row).collect()
    }

    async fn sessions_for_user(&self, userid: i64, modid: i64) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM visualclass_session WHERE userid = $1 AND modid = $2 ORDER BY id"
        ))
        .bind(userid)
        .bind(modid)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(session_from_row).collect()
    }

    async fn get_item(&self, id: i64) -> Result<Option<SessionItem>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM visualclass_item WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn insert_item(&self, item: &SessionItem) -> Result<i64, StoreError> {
        sqlx::query_scalar(
            r#"
            INSERT INTO visualclass_item (sessionid, pagetitle, type, question, answercorrect, answeruser)
            VALUES ($1,$2,$3,$4,$5,$6)
            RETURNING id
            "#,
        )
        .bind(item.sessionid)
        .bind(&item.pagetitle)
        .bind(item.item_type.code())
        .bind(&item.question)
        .bind(encode_answer(item)?)
        .bind(&item.answeruser)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn update_item(&self, item: &SessionItem) -> Result<(), StoreError> {
        let id = require_id(item.id, "visualclass_item")?;
        sqlx::query(
            r#"
            UPDATE visualclass_item SET sessionid=$2, pagetitle=$3, type=$4, question=$5,
                answercorrect=$6, answeruser=$7
            WHERE id=$1
            "#,
        )
        .bind(id)
        .bind(item.sessionid)
        .bind(&item.pagetitle)
        .bind(item.item_type.code())
        .bind(&item.question)
        .bind(encode_answer(item)?)
        .bind(&item.answeruser)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_item(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM visualclass_item WHERE id=$1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn items_for_session(&self, sessionid: i64) -> Result<Vec<SessionItem>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM visualclass_item WHERE sessionid = $1 ORDER BY id DESC"
        ))
        .bind(sessionid)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(item_from_row).collect()
    }

    async fn get_course(&self, id: i64) -> Result<Option<Course>, StoreError> {
        let row = sqlx::query("SELECT id, fullname, format FROM course WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| {
            Ok(Course {
                id: r.try_get("id").map_err(ser)?,
                fullname: r.try_get("fullname").map_err(ser)?,
                format: r.try_get("format").map_err(ser)?,
            })
        })
        .transpose()
    }

    async fn upsert_course(&self, course: &Course) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO course (id, fullname, format) VALUES ($1,$2,$3)
            ON CONFLICT (id) DO UPDATE SET fullname=EXCLUDED.fullname, format=EXCLUDED.format
            "#,
        )
        .bind(course.id)
        .bind(&course.fullname)
        .bind(&course.format)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn add_course_module(
        &self,
        course: i64,
        instance: i64,
        section: i32,
        visible: bool,
    ) -> Result<i64, StoreError> {
        sqlx::query_scalar(
            "INSERT INTO course_modules (course, instance, section, visible) VALUES ($1,$2,$3,$4) RETURNING id",
        )
        .bind(course)
        .bind(instance)
        .bind(section)
        .bind(visible)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn remove_course_module(&self, instance: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM course_modules WHERE instance=$1")
            .bind(instance)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn course_activities(&self, course: i64) -> Result<Vec<CourseActivity>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT cm.id AS coursemodule, cm.instance, v.name, cm.section, cm.visible
            FROM course_modules cm
            JOIN visualclass v ON v.id = cm.instance
            WHERE cm.course = $1
            ORDER BY cm.section, cm.id
            "#,
        )
        .bind(course)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter()
            .map(|r| {
                Ok(CourseActivity {
                    coursemodule: r.try_get("coursemodule").map_err(ser)?,
                    instance: r.try_get("instance").map_err(ser)?,
                    name: r.try_get("name").map_err(ser)?,
                    section: r.try_get("section").map_err(ser)?,
                    visible: r.try_get("visible").map_err(ser)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemType;
    use serde_json::json;

    fn item(answer: Option<AnswerValue>) -> SessionItem {
        SessionItem {
            id: None,
            sessionid: 1,
            pagetitle: None,
            item_type: ItemType::DragDrop,
            question: None,
            answercorrect: answer,
            answeruser: None,
        }
    }

    #[test]
    fn answer_column_keeps_every_shape() {
        let answers = [
            AnswerValue::Scalar("0".into()),
            AnswerValue::Scalar("Paris".into()),
            AnswerValue::List(vec!["red".into(), "0".into()]),
            AnswerValue::Opaque(json!({"x": 1, "pairs": [[1, 2], {"k": "v"}]})),
        ];
        for answer in answers {
            let text = encode_answer(&item(Some(answer.clone()))).unwrap();
            assert_eq!(decode_answer(text).unwrap(), Some(answer));
        }
    }

    #[test]
    fn missing_answer_stays_null() {
        assert_eq!(encode_answer(&item(None)).unwrap(), None);
        assert_eq!(decode_answer(None).unwrap(), None);
    }

    #[test]
    fn garbage_in_the_column_is_a_serialization_error() {
        assert!(matches!(
            decode_answer(Some("{not json".into())),
            Err(StoreError::Serialization(_))
        ));
    }
}
