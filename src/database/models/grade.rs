use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

/// One mark as shown on the portal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mark {
    /// Date of the lesson the mark is for, `dd.mm.yyyy`
    pub lesson_date: String,
    /// Date the mark was given, `dd.mm.yyyy`
    pub date: String,
    pub mark: i64,
}

impl Mark {
    /// Date the mark was given; `None` for the portal's `00.00.0000` placeholders
    pub fn given_on(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.date, "%d.%m.%Y").ok()
    }
}

/// Marks per lesson name
pub type Grades = BTreeMap<String, Vec<Mark>>;

#[derive(Debug, FromRow)]
struct GradeRow {
    lesson_name: String,
    lesson_date: Option<String>,
    date: Option<String>,
    mark: Option<i64>,
}

/// Per-user grade cache in the `grades` table
pub struct GradeCache;

impl GradeCache {
    pub async fn find_by_user(pool: &sqlx::SqlitePool, user_id: i64) -> Result<Grades, sqlx::Error> {
        let rows = sqlx::query_as::<_, GradeRow>(
            "SELECT lesson_name, lesson_date, date, mark FROM grades WHERE user_id = ? ORDER BY rowid",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        let mut grades = Grades::new();
        for row in rows {
            let marks = grades.entry(row.lesson_name).or_default();
            if let (Some(lesson_date), Some(date), Some(mark)) = (row.lesson_date, row.date, row.mark) {
                marks.push(Mark {
                    lesson_date,
                    date,
                    mark,
                });
            }
        }
        Ok(grades)
    }

    /// Replaces every cached row of the user in one transaction
    pub async fn replace_for_user(
        pool: &sqlx::SqlitePool,
        user_id: i64,
        grades: &Grades,
    ) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM grades WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut tx)
            .await?;

        for (lesson, marks) in grades {
            if marks.is_empty() {
                sqlx::query("INSERT INTO grades (user_id, lesson_name) VALUES (?, ?)")
                    .bind(user_id)
                    .bind(lesson)
                    .execute(&mut tx)
                    .await?;
                continue;
            }
            for mark in marks {
                sqlx::query(
                    "INSERT INTO grades (user_id, lesson_name, lesson_date, date, mark) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(user_id)
                .bind(lesson)
                .bind(&mark.lesson_date)
                .bind(&mark.date)
                .bind(mark.mark)
                .execute(&mut tx)
                .await?;
            }
        }

        tx.commit().await
    }
}
