use std::collections::HashSet;
use std::sync::Mutex;

use crate::drivers::{Dialect, PostgresDialect};
use crate::error::MigrationError;
use crate::models::{ColumnDescriptor, TableDescriptor};
use crate::type_map::{TargetType, TypeMapper};

/// PostgreSQL truncates identifiers beyond this.
const MAX_IDENT_LEN: usize = 63;

/// Translated DDL for one table, in application order: `pre` (enum types),
/// `create`, `comments`, then `indexes` and `foreign_keys` on the
/// orchestrator's schedule.
#[derive(Debug, Clone)]
pub struct TableDdl {
    pub pre: Vec<String>,
    pub create: String,
    pub comments: Vec<String>,
    pub indexes: Vec<String>,
    pub foreign_keys: Vec<String>,
    pub warnings: Vec<String>,
}

/// Name of the native enum type emitted for a column under
/// `EnumMapping::Native`.
pub fn enum_type_name(table: &str, column: &str) -> String {
    unique_ident(&format!("{}_{}_enum", table, column))
}

/// Emits target DDL from source descriptors. Shared across workers; the
/// index-name set is the only mutable state.
pub struct SchemaTranslator {
    mapper: TypeMapper,
    drop_target: bool,
    used_index_names: Mutex<HashSet<String>>,
}

impl SchemaTranslator {
    pub fn new(mapper: TypeMapper, drop_target: bool) -> Self {
        SchemaTranslator {
            mapper,
            drop_target,
            used_index_names: Mutex::new(HashSet::new()),
        }
    }

    /// Columns whose types have no mapping and no override, as
    /// `table.column (raw type)`. Non-empty means translation must not run.
    pub fn unmapped_columns(&self, table: &TableDescriptor) -> Vec<String> {
        table
            .columns
            .iter()
            .filter(|c| self.mapper.target_type(c) == TargetType::Unmapped)
            .map(|c| format!("{}.{} ({})", table.name, c.name, c.raw_type))
            .collect()
    }

    pub fn translate(&self, table: &TableDescriptor) -> Result<TableDdl, MigrationError> {
        let unmapped = self.unmapped_columns(table);
        if !unmapped.is_empty() {
            return Err(MigrationError::Mapping { columns: unmapped });
        }

        let dialect = PostgresDialect;
        let mut pre = Vec::new();
        let mut warnings = Vec::new();
        let mut column_defs = Vec::with_capacity(table.columns.len() + 1);

        for column in &table.columns {
            column_defs.push(self.column_def(table, column, &mut pre, &mut warnings));
        }

        if let Some(pk) = table.primary_key() {
            let cols = pk
                .columns
                .iter()
                .map(|c| dialect.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            column_defs.push(format!("PRIMARY KEY ({})", cols));
        }

        let create = format!(
            "CREATE TABLE {} (\n  {}\n)",
            dialect.quote_ident(&table.name),
            column_defs.join(",\n  ")
        );

        let comments = table
            .columns
            .iter()
            .filter_map(|c| {
                c.comment.as_ref().map(|text| {
                    format!(
                        "COMMENT ON COLUMN {}.{} IS '{}'",
                        dialect.quote_ident(&table.name),
                        dialect.quote_ident(&c.name),
                        text.replace('\'', "''")
                    )
                })
            })
            .collect();

        let indexes = table
            .indexes
            .iter()
            .filter(|i| !i.primary)
            .map(|index| {
                let name = self.index_name(&table.name, &index.name);
                let cols = index
                    .columns
                    .iter()
                    .map(|c| dialect.quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "CREATE {}INDEX {} ON {} ({})",
                    if index.unique { "UNIQUE " } else { "" },
                    dialect.quote_ident(&name),
                    dialect.quote_ident(&table.name),
                    cols
                )
            })
            .collect();

        let foreign_keys = table
            .foreign_keys
            .iter()
            .map(|fk| {
                let local = fk
                    .columns
                    .iter()
                    .map(|c| dialect.quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                let referenced = fk
                    .referenced_columns
                    .iter()
                    .map(|c| dialect.quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut sql = format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                    dialect.quote_ident(&table.name),
                    dialect.quote_ident(&unique_ident(&fk.name)),
                    local,
                    dialect.quote_ident(&fk.referenced_table),
                    referenced
                );
                if let Some(action) = &fk.on_delete {
                    sql.push_str(&format!(" ON DELETE {}", action));
                }
                if let Some(action) = &fk.on_update {
                    sql.push_str(&format!(" ON UPDATE {}", action));
                }
                sql
            })
            .collect();

        Ok(TableDdl {
            pre,
            create,
            comments,
            indexes,
            foreign_keys,
            warnings,
        })
    }

    fn column_def(
        &self,
        table: &TableDescriptor,
        column: &ColumnDescriptor,
        pre: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) -> String {
        let dialect = PostgresDialect;
        let mut def = dialect.quote_ident(&column.name);
        def.push(' ');
        let mut check = None;

        if column.identity {
            // Identity columns take the native serial mechanism; the
            // sequence is resynced after row copy.
            def.push_str(
                &dialect
                    .identity_sql(column)
                    .unwrap_or_else(|| "SERIAL".to_string()),
            );
        } else {
            match self.mapper.target_type(column) {
                TargetType::Plain(token) => def.push_str(&token),
                TargetType::EnumVarchar { length, variants } => {
                    def.push_str(&format!("VARCHAR({})", length));
                    let list = variants
                        .iter()
                        .map(|v| format!("'{}'", v.replace('\'', "''")))
                        .collect::<Vec<_>>()
                        .join(", ");
                    check = Some(format!(
                        "CHECK ({} IN ({}))",
                        dialect.quote_ident(&column.name),
                        list
                    ));
                }
                TargetType::EnumNative { variants } => {
                    let type_name = enum_type_name(&table.name, &column.name);
                    if self.drop_target {
                        pre.push(format!(
                            "DROP TYPE IF EXISTS {} CASCADE",
                            dialect.quote_ident(&type_name)
                        ));
                    }
                    let list = variants
                        .iter()
                        .map(|v| format!("'{}'", v.replace('\'', "''")))
                        .collect::<Vec<_>>()
                        .join(", ");
                    pre.push(format!(
                        "CREATE TYPE {} AS ENUM ({})",
                        dialect.quote_ident(&type_name),
                        list
                    ));
                    def.push_str(&dialect.quote_ident(&type_name));
                }
                // Ruled out by the unmapped_columns pre-check.
                TargetType::Unmapped => def.push_str("TEXT"),
            }
        }

        if !column.nullable {
            def.push_str(" NOT NULL");
        }

        if !column.identity {
            if let Some(default) = &column.default {
                let (clause, warning) = self.mapper.rewrite_default(column, default);
                if let Some(clause) = clause {
                    def.push_str(&format!(" DEFAULT {}", clause));
                }
                if let Some(warning) = warning {
                    log::warn!("{}: {}", table.name, warning);
                    warnings.push(warning);
                }
            }
        }

        if let Some(check) = check {
            def.push_str(" ");
            def.push_str(&check);
        }

        def
    }

    /// Secondary index names move into the target's shared namespace as
    /// `{table}_{index}`; residual collisions within one run get a short
    /// hash of the original qualified name.
    fn index_name(&self, table: &str, index: &str) -> String {
        let qualified = format!("{}_{}", table, index);
        let mut name = unique_ident(&qualified);
        let mut used = self
            .used_index_names
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !used.insert(name.clone()) {
            name = hashed_ident(&qualified);
            used.insert(name.clone());
        }
        name
    }
}

fn unique_ident(name: &str) -> String {
    if name.len() <= MAX_IDENT_LEN {
        name.to_string()
    } else {
        hashed_ident(name)
    }
}

fn hashed_ident(name: &str) -> String {
    let keep = MAX_IDENT_LEN - 9;
    let prefix: String = name.chars().take(keep).collect();
    format!("{}_{:08x}", prefix, fnv1a(name))
}

fn fnv1a(text: &str) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for byte in text.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnumMapping, ZeroDatePolicy};
    use crate::models::{DefaultKind, DefaultValue, ForeignKeyDescriptor, IndexDescriptor};
    use crate::type_map::LogicalKind;
    use std::collections::HashMap;

    fn col(name: &str, kind: LogicalKind, raw: &str, ordinal: usize) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.into(),
            kind,
            raw_type: raw.into(),
            nullable: true,
            default: None,
            identity: false,
            ordinal,
            comment: None,
        }
    }

    fn users_table() -> TableDescriptor {
        let mut id = col("id", LogicalKind::Int32, "int(11)", 0);
        id.identity = true;
        id.nullable = false;
        let mut email = col("email", LogicalKind::Varchar { length: 255 }, "varchar(255)", 1);
        email.nullable = false;
        let created = col("created", LogicalKind::DateTime, "datetime", 2);

        TableDescriptor {
            schema: "db".into(),
            name: "users".into(),
            columns: vec![id, email, created],
            indexes: vec![
                IndexDescriptor {
                    name: "PRIMARY".into(),
                    columns: vec!["id".into()],
                    unique: true,
                    primary: true,
                },
                IndexDescriptor {
                    name: "email".into(),
                    columns: vec!["email".into()],
                    unique: true,
                    primary: false,
                },
            ],
            foreign_keys: Vec::new(),
            row_estimate: 3,
            byte_size: 0,
        }
    }

    fn translator() -> SchemaTranslator {
        SchemaTranslator::new(TypeMapper::default(), true)
    }

    #[test]
    fn auto_increment_table_translates_to_serial() {
        let ddl = translator().translate(&users_table()).unwrap();
        assert_eq!(
            ddl.create,
            "CREATE TABLE \"users\" (\n  \"id\" SERIAL NOT NULL,\n  \"email\" VARCHAR(255) NOT NULL,\n  \"created\" TIMESTAMP,\n  PRIMARY KEY (\"id\")\n)"
        );
        assert_eq!(ddl.indexes.len(), 1);
        assert_eq!(
            ddl.indexes[0],
            "CREATE UNIQUE INDEX \"users_email\" ON \"users\" (\"email\")"
        );
    }

    #[test]
    fn foreign_keys_become_deferred_alter_statements() {
        let mut orders = TableDescriptor {
            schema: "db".into(),
            name: "orders".into(),
            columns: vec![col("user_id", LogicalKind::Int32, "int(11)", 0)],
            indexes: Vec::new(),
            foreign_keys: vec![ForeignKeyDescriptor {
                name: "orders_ibfk_1".into(),
                columns: vec!["user_id".into()],
                referenced_table: "users".into(),
                referenced_columns: vec!["id".into()],
                on_update: Some("RESTRICT".into()),
                on_delete: Some("CASCADE".into()),
            }],
            row_estimate: 0,
            byte_size: 0,
        };
        orders.columns[0].nullable = false;

        let ddl = translator().translate(&orders).unwrap();
        assert_eq!(ddl.foreign_keys.len(), 1);
        assert_eq!(
            ddl.foreign_keys[0],
            "ALTER TABLE \"orders\" ADD CONSTRAINT \"orders_ibfk_1\" FOREIGN KEY (\"user_id\") REFERENCES \"users\" (\"id\") ON DELETE CASCADE ON UPDATE RESTRICT"
        );
    }

    #[test]
    fn enum_column_gets_check_constraint() {
        let table = TableDescriptor {
            schema: "db".into(),
            name: "jobs".into(),
            columns: vec![col(
                "state",
                LogicalKind::Enum {
                    variants: vec!["queued".into(), "done".into()],
                },
                "enum('queued','done')",
                0,
            )],
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            row_estimate: 0,
            byte_size: 0,
        };
        let ddl = translator().translate(&table).unwrap();
        assert!(ddl.create.contains("\"state\" VARCHAR(6)"));
        assert!(ddl
            .create
            .contains("CHECK (\"state\" IN ('queued', 'done'))"));
    }

    #[test]
    fn native_enum_policy_emits_type_ddl() {
        let mapper = TypeMapper::new(HashMap::new(), EnumMapping::Native, ZeroDatePolicy::Null);
        let translator = SchemaTranslator::new(mapper, true);
        let table = TableDescriptor {
            schema: "db".into(),
            name: "jobs".into(),
            columns: vec![col(
                "state",
                LogicalKind::Enum { variants: vec!["a".into()] },
                "enum('a')",
                0,
            )],
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            row_estimate: 0,
            byte_size: 0,
        };
        let ddl = translator.translate(&table).unwrap();
        assert_eq!(ddl.pre.len(), 2);
        assert!(ddl.pre[0].starts_with("DROP TYPE IF EXISTS \"jobs_state_enum\""));
        assert_eq!(ddl.pre[1], "CREATE TYPE \"jobs_state_enum\" AS ENUM ('a')");
        assert!(ddl.create.contains("\"state\" \"jobs_state_enum\""));
    }

    #[test]
    fn unmapped_column_aborts_with_all_offenders() {
        let table = TableDescriptor {
            schema: "db".into(),
            name: "geo".into(),
            columns: vec![
                col("shape", LogicalKind::Unknown, "geometry", 0),
                col("area", LogicalKind::Unknown, "polygon", 1),
            ],
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            row_estimate: 0,
            byte_size: 0,
        };
        match translator().translate(&table) {
            Err(MigrationError::Mapping { columns }) => {
                assert_eq!(columns.len(), 2);
                assert!(columns[0].contains("geo.shape"));
                assert!(columns[1].contains("geo.area"));
            }
            other => panic!("expected mapping error, got {:?}", other.map(|d| d.create)),
        }
    }

    #[test]
    fn translated_default_lands_in_column_clause() {
        let mut table = users_table();
        table.columns[2].default = Some(DefaultValue {
            expr: "CURRENT_TIMESTAMP".into(),
            kind: DefaultKind::EngineFunction,
        });
        let ddl = translator().translate(&table).unwrap();
        assert!(ddl.create.contains("\"created\" TIMESTAMP DEFAULT CURRENT_TIMESTAMP"));
    }

    #[test]
    fn column_comments_are_carried_over() {
        let mut table = users_table();
        table.columns[1].comment = Some("the user's address".into());
        let ddl = translator().translate(&table).unwrap();
        assert_eq!(ddl.comments.len(), 1);
        assert!(ddl.comments[0].contains("COMMENT ON COLUMN \"users\".\"email\""));
        assert!(ddl.comments[0].contains("'the user''s address'"));
    }

    #[test]
    fn colliding_index_names_get_hash_suffix() {
        let translator = translator();
        let first = translator.index_name("a", "b_c");
        let second = translator.index_name("a_b", "c");
        assert_eq!(first, "a_b_c");
        assert_ne!(first, second);
        assert!(second.starts_with("a_b_c_"));
    }

    #[test]
    fn long_index_names_stay_under_limit() {
        let translator = translator();
        let long = "x".repeat(80);
        let name = translator.index_name(&long, "idx");
        assert!(name.len() <= MAX_IDENT_LEN);
    }
}
