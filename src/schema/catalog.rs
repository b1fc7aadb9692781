//! Schema Catalog
//!
//! Static description of the queryable FARS tables. Built once at startup
//! and shared read-only between requests.

use crate::error::{QueryError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

pub const FARS_JOIN_KEY: &str = "ST_CASE";

/// One queryable table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    /// Short table name as the model is allowed to write it (e.g. `accident_master`).
    pub name: String,
    /// Ordered column list.
    pub columns: Vec<String>,
    /// Columns holding text; every other column is numeric.
    #[serde(default)]
    pub textual_columns: Vec<String>,
}

impl TableSchema {
    pub fn is_textual(&self, column: &str) -> bool {
        self.textual_columns.iter().any(|c| c == column)
    }

    pub fn numeric_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(move |c| !self.is_textual(c))
            .map(String::as_str)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// JSON shape of a catalog file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogJson {
    namespace: Option<String>,
    join_key: String,
    tables: Vec<TableSchema>,
}

#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    namespace: String,
    join_key: String,
    tables: BTreeMap<String, TableSchema>,
}

impl SchemaCatalog {
    /// Build and validate a catalog.
    pub fn new(
        namespace: impl Into<String>,
        join_key: impl Into<String>,
        tables: Vec<TableSchema>,
    ) -> Result<Self> {
        let namespace = namespace.into().trim_matches('.').to_string();
        let join_key = join_key.into();

        if tables.is_empty() {
            return Err(QueryError::Catalog("catalog has no tables".to_string()));
        }

        let mut by_name = BTreeMap::new();
        for table in tables {
            validate_table(&table, &join_key, &namespace)?;
            if by_name.contains_key(&table.name) {
                return Err(QueryError::Catalog(format!("duplicate table '{}'", table.name)));
            }
            by_name.insert(table.name.clone(), table);
        }

        Ok(Self {
            namespace,
            join_key,
            tables: by_name,
        })
    }

    /// Load a catalog from a JSON file. The namespace argument is used when the
    /// file does not carry its own.
    pub fn load(path: &Path, default_namespace: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content, default_namespace)
    }

    pub fn from_json_str(content: &str, default_namespace: &str) -> Result<Self> {
        let parsed: CatalogJson = serde_json::from_str(content)?;
        let namespace = parsed
            .namespace
            .unwrap_or_else(|| default_namespace.to_string());
        Self::new(namespace, parsed.join_key, parsed.tables)
    }

    /// The built-in FARS catalog: accident, person and vehicle master tables.
    pub fn fars(namespace: &str) -> Result<Self> {
        Self::new(namespace, FARS_JOIN_KEY, fars_tables())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn join_key(&self) -> &str {
        &self.join_key
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    /// Fully-qualified form of a short table name.
    pub fn qualified_name(&self, short: &str) -> String {
        if self.namespace.is_empty() {
            short.to_string()
        } else {
            format!("{}.{}", self.namespace, short)
        }
    }

    /// `(short, qualified)` pairs for every table, in name order.
    pub fn qualified_names(&self) -> Vec<(String, String)> {
        self.tables
            .keys()
            .map(|short| (short.clone(), self.qualified_name(short)))
            .collect()
    }
}

fn validate_table(table: &TableSchema, join_key: &str, namespace: &str) -> Result<()> {
    if table.name.trim().is_empty() || table.name.contains('.') {
        return Err(QueryError::Catalog(format!(
            "table name '{}' must be a bare identifier",
            table.name
        )));
    }
    if !table.has_column(join_key) {
        return Err(QueryError::Catalog(format!(
            "table '{}' is missing join key '{}'",
            table.name, join_key
        )));
    }
    if table.is_textual(join_key) {
        return Err(QueryError::Catalog(format!(
            "join key '{}' must not be textual in table '{}'",
            join_key, table.name
        )));
    }

    let mut seen = HashSet::new();
    for column in &table.columns {
        if !seen.insert(column.as_str()) {
            return Err(QueryError::Catalog(format!(
                "duplicate column '{}' in table '{}'",
                column, table.name
            )));
        }
    }
    if let Some(stray) = table.textual_columns.iter().find(|c| !table.has_column(c)) {
        return Err(QueryError::Catalog(format!(
            "textual column '{}' is not a column of table '{}'",
            stray, table.name
        )));
    }

    // Qualification must stay idempotent: a short name may not reappear inside the prefix.
    let word = Regex::new(&format!(r"\b{}\b", regex::escape(&table.name)))
        .map_err(|e| QueryError::Catalog(e.to_string()))?;
    if word.is_match(namespace) {
        return Err(QueryError::Catalog(format!(
            "table name '{}' occurs inside namespace '{}'",
            table.name, namespace
        )));
    }

    Ok(())
}

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn fars_tables() -> Vec<TableSchema> {
    let accident = TableSchema {
        name: "accident_master".to_string(),
        columns: columns(&[
            "STATE", "ST_CASE", "PEDS", "PERNOTMVIT", "VE_TOTAL", "VE_FORMS", "PVH_INVL",
            "PERSONS", "PERMVIT", "COUNTY", "CITY", "MONTH", "DAY", "DAY_WEEK", "YEAR", "HOUR",
            "MINUTE", "TWAY_ID", "TWAY_ID2", "CL_TWAY", "ROUTE", "RUR_URB", "FUNC_SYS",
            "RD_OWNER", "NHS", "SP_JUR", "MILEPT", "LATITUDE", "LONGITUD", "HARM_EV", "MAN_COLL",
            "RELJCT1", "REL_JUNC", "RELJCT2", "TYP_INT", "REL_ROAD", "C_M_ZONE", "WRK_ZONE",
            "LGT_COND", "WEATHER", "SCH_BUS", "RAIL", "NOT_HOUR", "NOT_MIN", "ARR_HOUR",
            "ARR_MIN", "HOSP_HR", "HOSP_MN", "FATALS",
        ]),
        textual_columns: columns(&["RAIL", "TWAY_ID", "TWAY_ID2"]),
    };

    let person = TableSchema {
        name: "person_master".to_string(),
        columns: columns(&[
            "STATE", "ST_CASE", "PER_NO", "AGE", "SEX", "PER_TYP", "INJ_SEV", "SEAT_POS",
            "REST_USE", "REST_MIS", "HELM_USE", "HELM_MIS", "AIR_BAG", "EJECTION", "EJ_PATH",
            "EXTRICAT", "DRINKING", "ALC_STATUS", "ATST_TYP", "TEST_RES", "ALC_RES", "DRUGS",
            "DSTATUS", "HOSPITAL", "DOA", "DEATH_MO", "DEATH_DA", "DEATH_YR", "DEATH_TM",
            "DEATH_HR", "DEATH_MN", "LAG_HRS", "LAG_MINS", "N_MOT_NO", "STR_VEH", "DEVTYPE",
            "DEVMOTOR", "LOCATION", "WORK_INJ", "HISPANIC",
        ]),
        textual_columns: Vec::new(),
    };

    let mut vehicle_textual = columns(&[
        "VIN", "TRLR1VIN", "TRLR2VIN", "TRLR3VIN", "MCARR_ID", "MCARR_I2", "ADS_PRES", "ADS_LEV",
        "ADS_ENG",
    ]);
    vehicle_textual.extend((1..=12).map(|i| format!("VIN_{}", i)));

    let vehicle = TableSchema {
        name: "vehicle_master".to_string(),
        columns: columns(&[
            "STATE", "ST_CASE", "VEH_NO", "OCUPANTS", "NUMOCCS", "UNITTYPE", "HIT_RUN",
            "REG_STAT", "OWNER", "VIN", "MOD_YEAR", "VPICMAKE", "VPICMODEL", "VPICBODYCLASS",
            "MAKE", "MODEL", "BODY_TYP", "ICFINALBODY", "GVWR_FROM", "GVWR_TO", "TOW_VEH",
            "TRLR1VIN", "TRLR2VIN", "TRLR3VIN", "TRLR1GVWR", "TRLR2GVWR", "TRLR3GVWR", "J_KNIFE",
            "MCARR_ID", "MCARR_I1", "MCARR_I2", "V_CONFIG", "CARGO_BT", "HAZ_INV", "HAZ_PLAC",
            "HAZ_ID", "HAZ_CNO", "HAZ_REL", "BUS_USE", "SPEC_USE", "EMER_USE", "TRAV_SP",
            "UNDEROVERRIDE", "ROLLOVER", "ROLINLOC", "IMPACT1", "DEFORMED", "TOWAWAY", "TOWED",
            "M_HARM", "FIRE_EXP", "ADS_PRES", "ADS_LEV", "ADS_ENG", "MAK_MOD", "VIN_1", "VIN_2",
            "VIN_3", "VIN_4", "VIN_5", "VIN_6", "VIN_7", "VIN_8", "VIN_9", "VIN_10", "VIN_11",
            "VIN_12", "DEATHS", "DR_DRINK", "DR_PRES", "L_STATE", "DR_ZIP", "L_TYPE", "L_STATUS",
            "CDL_STAT", "L_ENDORS", "L_CL_VEH", "L_COMPL", "L_RESTRI", "DR_HGT", "DR_WGT",
            "PREV_ACC", "PREV_SUS1", "PREV_SUS2", "PREV_SUS3", "PREV_DWI", "PREV_SPD", "PREV_OTH",
            "FIRST_MO", "FIRST_YR", "LAST_MO", "LAST_YR", "SPEEDREL", "VTRAFWAY", "VNUM_LAN",
            "VSPD_LIM", "VALIGN", "VPROFILE", "VPAVETYP", "VSURCOND", "VTRAFCON", "VTCONT_F",
            "P_CRASH1", "P_CRASH2", "P_CRASH3", "PCRASH4", "PCRASH5", "ACC_TYPE", "ACC_CONFIG",
        ]),
        textual_columns: vehicle_textual,
    };

    vec![accident, person, vehicle]
}
