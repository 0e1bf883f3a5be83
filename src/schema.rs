//! Schema Registry
//!
//! Fixed description of the canonical fleet schema. Every validated query is
//! checked against this registry; nothing in the crate can mutate it.

use crate::error::{LogiqError, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Column of a canonical table
#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    pub name: &'static str,
    pub sql_type: &'static str,
}

/// Canonical table definition
#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
    pub primary_key: &'static str,
    /// (column, "table.column")
    pub foreign_keys: &'static [(&'static str, &'static str)],
}

const fn col(name: &'static str, sql_type: &'static str) -> ColumnDef {
    ColumnDef { name, sql_type }
}

static CANONICAL_TABLES: [TableDef; 5] = [
    TableDef {
        name: "trucks",
        columns: &[
            col("truck_id", "TEXT"),
            col("plate", "TEXT"),
            col("model", "TEXT"),
            col("brand", "TEXT"),
            col("driver_id", "TEXT"),
            col("region", "TEXT"),
            col("status", "TEXT"),
        ],
        primary_key: "truck_id",
        foreign_keys: &[],
    },
    TableDef {
        name: "drivers",
        columns: &[
            col("driver_id", "TEXT"),
            col("name", "TEXT"),
            col("license", "TEXT"),
        ],
        primary_key: "driver_id",
        foreign_keys: &[],
    },
    TableDef {
        name: "trips",
        columns: &[
            col("trip_id", "TEXT"),
            col("truck_id", "TEXT"),
            col("origin", "TEXT"),
            col("destination", "TEXT"),
            col("start_time", "TEXT"),
            col("end_time", "TEXT"),
            col("distance_km", "REAL"),
            col("status", "TEXT"),
        ],
        primary_key: "trip_id",
        foreign_keys: &[("truck_id", "trucks.truck_id")],
    },
    TableDef {
        name: "telemetry",
        columns: &[
            col("telemetry_id", "TEXT"),
            col("truck_id", "TEXT"),
            col("timestamp", "TEXT"),
            col("speed_kmh", "REAL"),
            col("fuel_level", "REAL"),
            col("engine_temp_c", "REAL"),
        ],
        primary_key: "telemetry_id",
        foreign_keys: &[("truck_id", "trucks.truck_id")],
    },
    TableDef {
        name: "alerts",
        columns: &[
            col("alert_id", "TEXT"),
            col("truck_id", "TEXT"),
            col("timestamp", "TEXT"),
            col("alert_type", "TEXT"),
            col("severity", "TEXT"),
            col("description", "TEXT"),
        ],
        primary_key: "alert_id",
        foreign_keys: &[("truck_id", "trucks.truck_id")],
    },
];

static CANONICAL: SchemaRegistry = SchemaRegistry {
    tables: &CANONICAL_TABLES,
};

/// Read-only registry of allowed tables and columns
#[derive(Debug)]
pub struct SchemaRegistry {
    tables: &'static [TableDef],
}

/// Serializable schema description for client introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub tables: BTreeMap<String, TableDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub columns: Vec<String>,
    pub primary_key: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub foreign_keys: BTreeMap<String, String>,
}

impl SchemaRegistry {
    /// The canonical fleet schema (trucks, drivers, trips, telemetry, alerts).
    pub fn canonical() -> &'static SchemaRegistry {
        &CANONICAL
    }

    pub fn tables(&self) -> BTreeSet<&'static str> {
        self.tables.iter().map(|t| t.name).collect()
    }

    pub fn columns(&self, table: &str) -> Result<BTreeSet<&'static str>> {
        let def = self
            .table(table)
            .ok_or_else(|| LogiqError::UnknownTable(vec![table.to_string()]))?;
        Ok(def.columns.iter().map(|c| c.name).collect())
    }

    pub fn table(&self, name: &str) -> Option<&'static TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn describe(&self) -> SchemaDescription {
        let tables = self
            .tables
            .iter()
            .map(|t| {
                let description = TableDescription {
                    columns: t.columns.iter().map(|c| c.name.to_string()).collect(),
                    primary_key: t.primary_key.to_string(),
                    foreign_keys: t
                        .foreign_keys
                        .iter()
                        .map(|(column, target)| (column.to_string(), target.to_string()))
                        .collect(),
                };
                (t.name.to_string(), description)
            })
            .collect();
        SchemaDescription { tables }
    }

    /// One line per table, e.g. `- drivers(driver_id TEXT, name TEXT, license TEXT)`.
    pub fn prompt_description(&self) -> String {
        self.tables
            .iter()
            .map(|t| {
                let cols = t
                    .columns
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.sql_type))
                    .join(", ");
                format!("- {}({})", t.name, cols)
            })
            .join("\n")
    }

    /// `CREATE TABLE IF NOT EXISTS` statements for provisioning a store with this schema.
    pub fn ddl(&self) -> Vec<String> {
        self.tables
            .iter()
            .map(|t| {
                let mut lines: Vec<String> = t
                    .columns
                    .iter()
                    .map(|c| {
                        if c.name == t.primary_key {
                            format!("    {} {} PRIMARY KEY", c.name, c.sql_type)
                        } else {
                            format!("    {} {}", c.name, c.sql_type)
                        }
                    })
                    .collect();
                for (column, target) in t.foreign_keys {
                    if let Some((table, target_col)) = target.split_once('.') {
                        lines.push(format!(
                            "    FOREIGN KEY ({}) REFERENCES {}({})",
                            column, table, target_col
                        ));
                    }
                }
                format!("CREATE TABLE IF NOT EXISTS {} (\n{}\n)", t.name, lines.join(",\n"))
            })
            .collect()
    }
}
