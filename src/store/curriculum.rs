//! 课程参考数据存储：内容描述符、年级、阐释、成就标准、资源类型与教学重点
//!
//! 阶段 2 需要完整描述符语料（全量入上下文做语义匹配，不做预过滤），
//! 阶段 3/5 需要按 code/title/slug 的点查。

use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// 年级：code 唯一，band 决定教学法语气（early_years / primary / secondary）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YearLevel {
    pub code: String,
    pub title: String,
    pub band: String,
    pub sort_order: i64,
}

/// 内容描述符：课程中可被资源对齐的最小条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    pub code: String,
    pub text: String,
    pub year_level_code: String,
    pub strand_title: String,
}

/// 描述符阐释
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Elaboration {
    pub code: String,
    pub text: String,
    pub content_descriptor_code: String,
}

/// 年级成就标准
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementStandard {
    pub code: String,
    pub text: String,
    pub year_level_code: String,
}

/// 教学重点参考行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeachingFocusRow {
    pub name: String,
    pub slug: String,
}

/// 资源类型参考行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceTypeRow {
    pub name: String,
    pub slug: String,
    pub description: String,
    pub teaching_focus_slug: String,
}

/// 课程参考数据只读接口
pub trait CurriculumStore: Send + Sync {
    /// 全量描述符，按 (year_level_code, strand_title) 排序
    fn all_descriptors(&self) -> Result<Vec<Descriptor>, StoreError>;
    fn year_level_by_title(&self, title: &str) -> Result<Option<YearLevel>, StoreError>;
    fn year_level_by_code(&self, code: &str) -> Result<Option<YearLevel>, StoreError>;
    fn descriptor_by_code(&self, code: &str) -> Result<Option<Descriptor>, StoreError>;
    fn elaborations_for(&self, descriptor_code: &str) -> Result<Vec<Elaboration>, StoreError>;
    fn achievement_standards_for(&self, year_level_code: &str)
        -> Result<Vec<AchievementStandard>, StoreError>;
    fn resource_type_by_slug(&self, slug: &str) -> Result<Option<ResourceTypeRow>, StoreError>;
    fn teaching_focus_by_slug(&self, slug: &str) -> Result<Option<TeachingFocusRow>, StoreError>;
}

/// 内存实现：测试与演示用
#[derive(Debug, Default, Clone)]
pub struct MemoryCurriculumStore {
    pub year_levels: Vec<YearLevel>,
    pub descriptors: Vec<Descriptor>,
    pub elaborations: Vec<Elaboration>,
    pub achievement_standards: Vec<AchievementStandard>,
    pub teaching_focuses: Vec<TeachingFocusRow>,
    pub resource_types: Vec<ResourceTypeRow>,
}

impl MemoryCurriculumStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 小型演示语料：覆盖六阶段全部查找路径
    pub fn demo() -> Self {
        let bands = [
            ("MATMATFY", "Foundation Year", "early_years", 0),
            ("MATMATY1", "Year 1", "early_years", 1),
            ("MATMATY2", "Year 2", "early_years", 2),
            ("MATMATY3", "Year 3", "primary", 3),
            ("MATMATY4", "Year 4", "primary", 4),
            ("MATMATY5", "Year 5", "primary", 5),
            ("MATMATY6", "Year 6", "primary", 6),
            ("MATMATY7", "Year 7", "secondary", 7),
            ("MATMATY8", "Year 8", "secondary", 8),
            ("MATMATY9", "Year 9", "secondary", 9),
            ("MATMATY10", "Year 10", "secondary", 10),
        ];
        let year_levels = bands
            .iter()
            .map(|(code, title, band, order)| YearLevel {
                code: code.to_string(),
                title: title.to_string(),
                band: band.to_string(),
                sort_order: *order,
            })
            .collect();

        let descriptors = vec![
            Descriptor {
                code: "AC9M5N03".to_string(),
                text: "Compare and order fractions with the same and related denominators including mixed numerals".to_string(),
                year_level_code: "MATMATY5".to_string(),
                strand_title: "Number".to_string(),
            },
            Descriptor {
                code: "AC9M5N06".to_string(),
                text: "Solve problems involving addition and subtraction of fractions with the same or related denominators".to_string(),
                year_level_code: "MATMATY5".to_string(),
                strand_title: "Number".to_string(),
            },
            Descriptor {
                code: "AC9M3N02".to_string(),
                text: "Recognise and represent unit fractions and their multiples in different ways".to_string(),
                year_level_code: "MATMATY3".to_string(),
                strand_title: "Number".to_string(),
            },
            Descriptor {
                code: "AC9M5A01".to_string(),
                text: "Recognise and explain the connection between multiplication and division as inverse operations".to_string(),
                year_level_code: "MATMATY5".to_string(),
                strand_title: "Algebra".to_string(),
            },
        ];

        let elaborations = vec![Elaboration {
            code: "AC9M5N06_E1".to_string(),
            text: "using different ways to add and subtract fractions, including bar models and number lines".to_string(),
            content_descriptor_code: "AC9M5N06".to_string(),
        }];

        let achievement_standards = vec![AchievementStandard {
            code: "AS_Y5".to_string(),
            text: "By the end of Year 5, students order and represent fractions with the same or related denominators".to_string(),
            year_level_code: "MATMATY5".to_string(),
        }];

        let teaching_focuses = vec![
            TeachingFocusRow { name: "Explicit Instruction".to_string(), slug: "explicit_instruction".to_string() },
            TeachingFocusRow { name: "Deep Learning & Inquiry".to_string(), slug: "deep_learning_inquiry".to_string() },
            TeachingFocusRow { name: "Fluency & Practice".to_string(), slug: "fluency_practice".to_string() },
            TeachingFocusRow { name: "Assessment & Feedback".to_string(), slug: "assessment_feedback".to_string() },
            TeachingFocusRow { name: "Planning".to_string(), slug: "planning".to_string() },
        ];

        let resource_types = vec![ResourceTypeRow {
            name: "Worked Example Study".to_string(),
            slug: "worked_example_study".to_string(),
            description: "Step-by-step worked examples with faded scaffolding".to_string(),
            teaching_focus_slug: "explicit_instruction".to_string(),
        }];

        Self {
            year_levels,
            descriptors,
            elaborations,
            achievement_standards,
            teaching_focuses,
            resource_types,
        }
    }
}

impl CurriculumStore for MemoryCurriculumStore {
    fn all_descriptors(&self) -> Result<Vec<Descriptor>, StoreError> {
        let mut rows = self.descriptors.clone();
        rows.sort_by(|a, b| {
            (a.year_level_code.as_str(), a.strand_title.as_str())
                .cmp(&(b.year_level_code.as_str(), b.strand_title.as_str()))
        });
        Ok(rows)
    }

    fn year_level_by_title(&self, title: &str) -> Result<Option<YearLevel>, StoreError> {
        Ok(self.year_levels.iter().find(|y| y.title == title).cloned())
    }

    fn year_level_by_code(&self, code: &str) -> Result<Option<YearLevel>, StoreError> {
        Ok(self.year_levels.iter().find(|y| y.code == code).cloned())
    }

    fn descriptor_by_code(&self, code: &str) -> Result<Option<Descriptor>, StoreError> {
        Ok(self.descriptors.iter().find(|d| d.code == code).cloned())
    }

    fn elaborations_for(&self, descriptor_code: &str) -> Result<Vec<Elaboration>, StoreError> {
        Ok(self
            .elaborations
            .iter()
            .filter(|e| e.content_descriptor_code == descriptor_code)
            .cloned()
            .collect())
    }

    fn achievement_standards_for(
        &self,
        year_level_code: &str,
    ) -> Result<Vec<AchievementStandard>, StoreError> {
        Ok(self
            .achievement_standards
            .iter()
            .filter(|s| s.year_level_code == year_level_code)
            .cloned()
            .collect())
    }

    fn resource_type_by_slug(&self, slug: &str) -> Result<Option<ResourceTypeRow>, StoreError> {
        Ok(self.resource_types.iter().find(|r| r.slug == slug).cloned())
    }

    fn teaching_focus_by_slug(&self, slug: &str) -> Result<Option<TeachingFocusRow>, StoreError> {
        Ok(self.teaching_focuses.iter().find(|t| t.slug == slug).cloned())
    }
}

/// SQLite 实现：单连接 + Mutex（参考数据读多写少）
pub struct SqliteCurriculumStore {
    conn: Mutex<Connection>,
}

impl SqliteCurriculumStore {
    pub fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS year_levels (
                code TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                band TEXT NOT NULL,
                sort_order INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS content_descriptors (
                code TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                year_level_code TEXT NOT NULL,
                strand_title TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS elaborations (
                code TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                content_descriptor_code TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS achievement_standards (
                code TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                year_level_code TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS teaching_focuses (
                slug TEXT PRIMARY KEY,
                name TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS resource_types (
                slug TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                teaching_focus_slug TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// 批量导入演示/种子数据
    pub fn import(&self, data: &MemoryCurriculumStore) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        for y in &data.year_levels {
            conn.execute(
                "INSERT OR REPLACE INTO year_levels (code, title, band, sort_order) VALUES (?1, ?2, ?3, ?4)",
                params![y.code, y.title, y.band, y.sort_order],
            )?;
        }
        for d in &data.descriptors {
            conn.execute(
                "INSERT OR REPLACE INTO content_descriptors (code, text, year_level_code, strand_title) VALUES (?1, ?2, ?3, ?4)",
                params![d.code, d.text, d.year_level_code, d.strand_title],
            )?;
        }
        for e in &data.elaborations {
            conn.execute(
                "INSERT OR REPLACE INTO elaborations (code, text, content_descriptor_code) VALUES (?1, ?2, ?3)",
                params![e.code, e.text, e.content_descriptor_code],
            )?;
        }
        for s in &data.achievement_standards {
            conn.execute(
                "INSERT OR REPLACE INTO achievement_standards (code, text, year_level_code) VALUES (?1, ?2, ?3)",
                params![s.code, s.text, s.year_level_code],
            )?;
        }
        for t in &data.teaching_focuses {
            conn.execute(
                "INSERT OR REPLACE INTO teaching_focuses (slug, name) VALUES (?1, ?2)",
                params![t.slug, t.name],
            )?;
        }
        for r in &data.resource_types {
            conn.execute(
                "INSERT OR REPLACE INTO resource_types (slug, name, description, teaching_focus_slug) VALUES (?1, ?2, ?3, ?4)",
                params![r.slug, r.name, r.description, r.teaching_focus_slug],
            )?;
        }
        Ok(())
    }
}

impl CurriculumStore for SqliteCurriculumStore {
    fn all_descriptors(&self) -> Result<Vec<Descriptor>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT code, text, year_level_code, strand_title FROM content_descriptors
             ORDER BY year_level_code, strand_title",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Descriptor {
                    code: row.get(0)?,
                    text: row.get(1)?,
                    year_level_code: row.get(2)?,
                    strand_title: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn year_level_by_title(&self, title: &str) -> Result<Option<YearLevel>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT code, title, band, sort_order FROM year_levels WHERE title = ?1",
                params![title],
                |row| {
                    Ok(YearLevel {
                        code: row.get(0)?,
                        title: row.get(1)?,
                        band: row.get(2)?,
                        sort_order: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn year_level_by_code(&self, code: &str) -> Result<Option<YearLevel>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT code, title, band, sort_order FROM year_levels WHERE code = ?1",
                params![code],
                |row| {
                    Ok(YearLevel {
                        code: row.get(0)?,
                        title: row.get(1)?,
                        band: row.get(2)?,
                        sort_order: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn descriptor_by_code(&self, code: &str) -> Result<Option<Descriptor>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT code, text, year_level_code, strand_title FROM content_descriptors WHERE code = ?1",
                params![code],
                |row| {
                    Ok(Descriptor {
                        code: row.get(0)?,
                        text: row.get(1)?,
                        year_level_code: row.get(2)?,
                        strand_title: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn elaborations_for(&self, descriptor_code: &str) -> Result<Vec<Elaboration>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT code, text, content_descriptor_code FROM elaborations
             WHERE content_descriptor_code = ?1 ORDER BY code",
        )?;
        let rows = stmt
            .query_map(params![descriptor_code], |row| {
                Ok(Elaboration {
                    code: row.get(0)?,
                    text: row.get(1)?,
                    content_descriptor_code: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn achievement_standards_for(
        &self,
        year_level_code: &str,
    ) -> Result<Vec<AchievementStandard>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT code, text, year_level_code FROM achievement_standards
             WHERE year_level_code = ?1 ORDER BY code",
        )?;
        let rows = stmt
            .query_map(params![year_level_code], |row| {
                Ok(AchievementStandard {
                    code: row.get(0)?,
                    text: row.get(1)?,
                    year_level_code: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn resource_type_by_slug(&self, slug: &str) -> Result<Option<ResourceTypeRow>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT slug, name, description, teaching_focus_slug FROM resource_types WHERE slug = ?1",
                params![slug],
                |row| {
                    Ok(ResourceTypeRow {
                        slug: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        teaching_focus_slug: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn teaching_focus_by_slug(&self, slug: &str) -> Result<Option<TeachingFocusRow>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT slug, name FROM teaching_focuses WHERE slug = ?1",
                params![slug],
                |row| {
                    Ok(TeachingFocusRow {
                        slug: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_store_lookups() {
        let store = MemoryCurriculumStore::demo();
        assert!(!store.all_descriptors().unwrap().is_empty());
        let y5 = store.year_level_by_title("Year 5").unwrap().unwrap();
        assert_eq!(y5.code, "MATMATY5");
        assert_eq!(y5.band, "primary");
        assert!(store.year_level_by_title("Year 99").unwrap().is_none());
    }

    #[test]
    fn test_sqlite_roundtrip() {
        let store = SqliteCurriculumStore::open_in_memory().unwrap();
        store.import(&MemoryCurriculumStore::demo()).unwrap();

        let descriptors = store.all_descriptors().unwrap();
        assert_eq!(descriptors.len(), 4);
        // 按 (year_level_code, strand_title) 排序
        assert_eq!(descriptors[0].code, "AC9M3N02");

        let d = store.descriptor_by_code("AC9M5N06").unwrap().unwrap();
        assert_eq!(d.strand_title, "Number");
        assert_eq!(store.elaborations_for("AC9M5N06").unwrap().len(), 1);
        assert!(store.resource_type_by_slug("worked_example_study").unwrap().is_some());
        assert!(store.resource_type_by_slug("missing").unwrap().is_none());
    }
}
