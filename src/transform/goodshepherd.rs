//! Good Shepherd Collective transformers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{base_record, map_rows, pick_str};
use crate::parser::{PayloadError, RawPayload};
use crate::record::Transformed;

const LOCATION: &[&str] = &["location", "locality", "community", "village", "city", "area"];
const GOVERNORATE: &[&str] = &["governorate", "district", "region"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoodShepherdCategory {
    Healthcare,
    Demolitions,
    Prisoners,
    Ngo,
}

impl GoodShepherdCategory {
    pub const ALL: [GoodShepherdCategory; 4] = [
        GoodShepherdCategory::Healthcare,
        GoodShepherdCategory::Demolitions,
        GoodShepherdCategory::Prisoners,
        GoodShepherdCategory::Ngo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GoodShepherdCategory::Healthcare => "healthcare",
            GoodShepherdCategory::Demolitions => "demolitions",
            GoodShepherdCategory::Prisoners => "prisoners",
            GoodShepherdCategory::Ngo => "ngo",
        }
    }

    /// Validator schema for the category. Prisoner counts reuse the
    /// casualties schema.
    pub fn schema(self) -> &'static str {
        match self {
            GoodShepherdCategory::Healthcare => "healthcare",
            GoodShepherdCategory::Demolitions => "demolitions",
            GoodShepherdCategory::Prisoners => "casualties",
            GoodShepherdCategory::Ngo => "ngo",
        }
    }

    /// Whether the category is a dated series that gets a `recent.json`.
    pub fn is_time_series(self) -> bool {
        !matches!(self, GoodShepherdCategory::Ngo)
    }

    pub fn transform(self, payload: &RawPayload) -> Result<Transformed, PayloadError> {
        match self {
            GoodShepherdCategory::Healthcare => transform_healthcare(payload),
            GoodShepherdCategory::Demolitions => transform_demolitions(payload),
            GoodShepherdCategory::Prisoners => transform_prisoners(payload),
            GoodShepherdCategory::Ngo => transform_ngo(payload),
        }
    }
}

impl fmt::Display for GoodShepherdCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GoodShepherdCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GoodShepherdCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown Good Shepherd category '{s}'"))
    }
}

pub const SOURCE: &str = "Good Shepherd Collective";

/// Attacks on healthcare facilities and workers.
pub fn transform_healthcare(payload: &RawPayload) -> Result<Transformed, PayloadError> {
    map_rows(payload, |row, ctx| {
        let date = ctx.date(row, &["date", "incident_date", "event_date"]);
        let location = pick_str(row, LOCATION).or_else(|| pick_str(row, GOVERNORATE));
        let mut record = base_record(SOURCE, date, location);
        record.set_opt("governorate", pick_str(row, GOVERNORATE));
        record.set_opt("type", pick_str(row, &["type", "attack_type", "incident_type"]));
        record.set_opt("facility_name", pick_str(row, &["facility_name", "facility", "hospital"]));
        record.set_opt("facility_type", pick_str(row, &["facility_type"]));
        record.set_opt("killed", ctx.count(row, &["killed", "deaths", "fatalities"]));
        record.set_opt("injured", ctx.count(row, &["injured", "injuries"]));
        record
    })
}

/// Home and structure demolitions.
pub fn transform_demolitions(payload: &RawPayload) -> Result<Transformed, PayloadError> {
    map_rows(payload, |row, ctx| {
        let date = ctx.date(row, &["date", "demolition_date", "event_date"]);
        let location = pick_str(row, LOCATION).or_else(|| pick_str(row, GOVERNORATE));
        let mut record = base_record(SOURCE, date, location);
        record.set_opt("governorate", pick_str(row, GOVERNORATE));
        record.set_opt(
            "structures",
            ctx.count(row, &["structures", "structures_demolished", "number_of_structures", "count"]),
        );
        record.set_opt(
            "people_affected",
            ctx.count(row, &["people_affected", "people_displaced", "displaced", "affected"]),
        );
        record.set_opt("children_affected", ctx.count(row, &["children_affected", "children"]));
        record.set_opt("structure_type", pick_str(row, &["structure_type", "type"]));
        record.set_opt("reason", pick_str(row, &["reason", "demolition_type"]));
        record
    })
}

/// Detention counts. `killed`/`injured` map deaths and injuries in custody.
pub fn transform_prisoners(payload: &RawPayload) -> Result<Transformed, PayloadError> {
    map_rows(payload, |row, ctx| {
        let date = ctx.date(row, &["date", "month", "period"]);
        let location = pick_str(row, LOCATION).or_else(|| pick_str(row, GOVERNORATE));
        let mut record = base_record(SOURCE, date, location);
        record.set_opt(
            "detained",
            ctx.count(row, &["total", "total_prisoners", "prisoners", "count", "value"]),
        );
        record.set_opt(
            "administrative_detainees",
            ctx.count(row, &["administrative_detainees", "admin_detainees"]),
        );
        record.set_opt("children", ctx.count(row, &["children", "child_prisoners", "minors"]));
        record.set_opt("killed", ctx.count(row, &["killed", "deaths_in_custody"]));
        record.set_opt("injured", ctx.count(row, &["injured", "injured_in_custody"]));
        record
    })
}

/// Registered NGOs operating in the territory.
pub fn transform_ngo(payload: &RawPayload) -> Result<Transformed, PayloadError> {
    map_rows(payload, |row, ctx| {
        let date = ctx.date(row, &["date", "updated_at", "registration_date"]);
        let location = pick_str(row, LOCATION).or_else(|| pick_str(row, GOVERNORATE));
        let mut record = base_record(SOURCE, date, location);
        record.set_opt("organization", pick_str(row, &["organization", "name", "ngo_name"]));
        record.set_opt("type", pick_str(row, &["type", "category", "sector"]));
        record.set_opt("status", pick_str(row, &["status"]));
        record
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::classify;
    use serde_json::json;

    #[test]
    fn test_healthcare_record() {
        let payload = classify(json!({"data": [{
            "incident_date": "2024-02-10T08:00:00Z",
            "governorate": "Khan Younis",
            "attack_type": "Airstrike",
            "hospital": "Nasser",
            "killed": 3,
            "injured": "7"
        }]}))
        .unwrap();

        let out = transform_healthcare(&payload).unwrap();
        let r = &out.records[0];
        assert_eq!(r.get("date"), Some(&json!("2024-02-10")));
        assert_eq!(r.get("location"), Some(&json!("Khan Younis")));
        assert_eq!(r.get("type"), Some(&json!("Airstrike")));
        assert_eq!(r.get("injured"), Some(&json!(7)));
        assert_eq!(r.get("source"), Some(&json!(SOURCE)));
    }

    #[test]
    fn test_demolitions_record() {
        let payload = classify(json!([{
            "date": "01/15/2024",
            "locality": "Masafer Yatta",
            "structures_demolished": "4",
            "people_displaced": 22
        }]))
        .unwrap();

        let out = transform_demolitions(&payload).unwrap();
        let r = &out.records[0];
        assert_eq!(r.get("date"), Some(&json!("2024-01-15")));
        assert_eq!(r.get("structures"), Some(&json!(4)));
        assert_eq!(r.get("people_affected"), Some(&json!(22)));
    }

    #[test]
    fn test_schema_mapping() {
        assert_eq!(GoodShepherdCategory::Healthcare.schema(), "healthcare");
        assert_eq!(GoodShepherdCategory::Demolitions.schema(), "demolitions");
        assert_eq!(GoodShepherdCategory::Prisoners.schema(), "casualties");
        assert_eq!(GoodShepherdCategory::Ngo.schema(), "ngo");
    }

    #[test]
    fn test_prisoner_counts() {
        let payload = classify(json!([{"month": "2024-03", "total": "9,500", "children": 200}])).unwrap();
        let out = transform_prisoners(&payload).unwrap();
        let r = &out.records[0];
        assert_eq!(r.get("date"), Some(&json!("2024-03-01")));
        assert_eq!(r.get("detained"), Some(&json!(9500)));
        assert!(r.get("killed").is_none());
    }
}
