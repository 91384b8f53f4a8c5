//! Fixed registry of dataset schemas.

#[derive(Debug)]
pub struct NumericRange {
    pub field: &'static str,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug)]
pub struct EnumField {
    pub field: &'static str,
    pub allowed: &'static [&'static str],
}

#[derive(Debug)]
pub struct Schema {
    pub name: &'static str,
    pub required_fields: &'static [&'static str],
    /// Every numeric field the schema knows, with its sane range.
    pub numeric_ranges: &'static [NumericRange],
    pub date_fields: &'static [&'static str],
    pub enum_fields: &'static [EnumField],
}

const fn range(field: &'static str, min: f64, max: f64) -> NumericRange {
    NumericRange { field, min, max }
}

pub static CASUALTIES: Schema = Schema {
    name: "casualties",
    required_fields: &["date", "killed", "injured"],
    numeric_ranges: &[
        range("killed", 0.0, 100_000.0),
        range("injured", 0.0, 200_000.0),
        range("detained", 0.0, 100_000.0),
        range("administrative_detainees", 0.0, 100_000.0),
        range("children", 0.0, 100_000.0),
    ],
    date_fields: &["date"],
    enum_fields: &[],
};

pub static DEMOLITIONS: Schema = Schema {
    name: "demolitions",
    required_fields: &["date", "location", "structures"],
    numeric_ranges: &[
        range("structures", 0.0, 1_000.0),
        range("people_affected", 0.0, 100_000.0),
        range("children_affected", 0.0, 100_000.0),
    ],
    date_fields: &["date"],
    enum_fields: &[],
};

pub static HEALTHCARE: Schema = Schema {
    name: "healthcare",
    required_fields: &["date", "location", "type"],
    numeric_ranges: &[range("killed", 0.0, 10_000.0), range("injured", 0.0, 10_000.0)],
    date_fields: &["date"],
    enum_fields: &[],
};

pub static NGO: Schema = Schema {
    name: "ngo",
    required_fields: &["organization", "type"],
    numeric_ranges: &[],
    date_fields: &["date"],
    enum_fields: &[],
};

pub static WORLDBANK: Schema = Schema {
    name: "worldbank",
    required_fields: &["date", "indicator", "value"],
    numeric_ranges: &[
        range("year", 1960.0, 2100.0),
        range("value", f64::MIN, f64::MAX),
    ],
    date_fields: &["date"],
    enum_fields: &[],
};

pub static CONFLICT: Schema = Schema {
    name: "conflict",
    required_fields: &["date", "event_type", "location"],
    numeric_ranges: &[
        range("fatalities", 0.0, 10_000.0),
        range("latitude", -90.0, 90.0),
        range("longitude", -180.0, 180.0),
    ],
    date_fields: &["date"],
    enum_fields: &[EnumField {
        field: "event_type",
        allowed: &[
            "Battles",
            "Explosions/Remote violence",
            "Violence against civilians",
            "Protests",
            "Riots",
            "Strategic developments",
        ],
    }],
};

pub static INFRASTRUCTURE: Schema = Schema {
    name: "infrastructure",
    required_fields: &["date", "location", "type"],
    numeric_ranges: &[
        range("count", 0.0, 1_000_000.0),
        range("damaged", 0.0, 10_000.0),
        range("destroyed", 0.0, 10_000.0),
        range("students_affected", 0.0, 1_000_000.0),
        range("students_killed", 0.0, 100_000.0),
        range("staff_killed", 0.0, 10_000.0),
        range("people_affected", 0.0, 5_000_000.0),
    ],
    date_fields: &["date"],
    enum_fields: &[],
};

pub static HUMANITARIAN: Schema = Schema {
    name: "humanitarian",
    required_fields: &["date", "location"],
    numeric_ranges: &[
        range("displaced", 0.0, 5_000_000.0),
        range("households", 0.0, 1_000_000.0),
        range("people_in_need", 0.0, 5_000_000.0),
        range("people_targeted", 0.0, 5_000_000.0),
        range("people_reached", 0.0, 5_000_000.0),
        range("funding_required", 0.0, 100_000_000_000.0),
        range("funding_received", 0.0, 100_000_000_000.0),
    ],
    date_fields: &["date"],
    enum_fields: &[],
};

/// Permissive fallback: nothing required, dates checked when present.
pub static GENERIC: Schema = Schema {
    name: "generic",
    required_fields: &[],
    numeric_ranges: &[],
    date_fields: &["date"],
    enum_fields: &[],
};

static REGISTRY: &[&Schema] = &[
    &CASUALTIES,
    &DEMOLITIONS,
    &HEALTHCARE,
    &NGO,
    &WORLDBANK,
    &CONFLICT,
    &INFRASTRUCTURE,
    &HUMANITARIAN,
    &GENERIC,
];

pub fn lookup(dataset_type: &str) -> Option<&'static Schema> {
    REGISTRY
        .iter()
        .copied()
        .find(|schema| schema.name.eq_ignore_ascii_case(dataset_type.trim()))
}

impl Schema {
    pub fn range_for(&self, field: &str) -> Option<&NumericRange> {
        self.numeric_ranges.iter().find(|r| r.field == field)
    }
}
