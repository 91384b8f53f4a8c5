//! HDX (Humanitarian Data Exchange) category transformers.
//!
//! HDX resources arrive as JSON arrays, `data`-wrapped JSON, count-only
//! metadata or CSV (often with an HXL tag row); every transformer here
//! accepts all of them through [`map_rows`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{base_record, map_rows, pick_str};
use crate::parser::{PayloadError, RawPayload};
use crate::record::Transformed;

const DATE: &[&str] = &["date", "event_date", "reference_date", "report_date", "date_reported"];
const LOCATION: &[&str] = &[
    "location",
    "admin1",
    "adm1_name",
    "governorate",
    "region",
    "admin2",
    "area",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HdxCategory {
    Conflict,
    Education,
    Water,
    Infrastructure,
    Refugees,
    Humanitarian,
}

impl HdxCategory {
    pub const ALL: [HdxCategory; 6] = [
        HdxCategory::Conflict,
        HdxCategory::Education,
        HdxCategory::Water,
        HdxCategory::Infrastructure,
        HdxCategory::Refugees,
        HdxCategory::Humanitarian,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HdxCategory::Conflict => "conflict",
            HdxCategory::Education => "education",
            HdxCategory::Water => "water",
            HdxCategory::Infrastructure => "infrastructure",
            HdxCategory::Refugees => "refugees",
            HdxCategory::Humanitarian => "humanitarian",
        }
    }

    /// Validator schema the category's records are checked against.
    pub fn schema(self) -> &'static str {
        match self {
            HdxCategory::Conflict => "conflict",
            HdxCategory::Education | HdxCategory::Water | HdxCategory::Infrastructure => {
                "infrastructure"
            }
            HdxCategory::Refugees | HdxCategory::Humanitarian => "humanitarian",
        }
    }

    pub fn transform(self, payload: &RawPayload, source: &str) -> Result<Transformed, PayloadError> {
        match self {
            HdxCategory::Conflict => transform_conflict(payload, source),
            HdxCategory::Education => transform_education(payload, source),
            HdxCategory::Water => transform_water(payload, source),
            HdxCategory::Infrastructure => transform_infrastructure(payload, source),
            HdxCategory::Refugees => transform_refugees(payload, source),
            HdxCategory::Humanitarian => transform_humanitarian(payload, source),
        }
    }
}

impl fmt::Display for HdxCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HdxCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HdxCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown HDX category '{s}'"))
    }
}

/// ACLED-style conflict events.
pub fn transform_conflict(payload: &RawPayload, source: &str) -> Result<Transformed, PayloadError> {
    map_rows(payload, |row, ctx| {
        let date = ctx.date(row, &["event_date", "date", "reference_date"]);
        let mut record = base_record(source, date, pick_str(row, LOCATION));
        record.set_opt("event_type", pick_str(row, &["event_type", "type", "category"]));
        record.set_opt("sub_event_type", pick_str(row, &["sub_event_type", "subtype"]));
        record.set_opt("admin2", pick_str(row, &["admin2", "adm2_name", "locality"]));
        record.set_opt("actor", pick_str(row, &["actor1", "actor"]));
        record.set_opt("fatalities", ctx.count(row, &["fatalities", "killed", "deaths"]));
        record.set_opt(
            "latitude",
            ctx.float(row, &["latitude", "lat"]).map(super::float_value),
        );
        record.set_opt(
            "longitude",
            ctx.float(row, &["longitude", "lon", "lng"]).map(super::float_value),
        );
        record
    })
}

/// Damage to schools and education facilities.
pub fn transform_education(payload: &RawPayload, source: &str) -> Result<Transformed, PayloadError> {
    map_rows(payload, |row, ctx| {
        let date = ctx.date(row, DATE);
        let mut record = base_record(source, date, pick_str(row, LOCATION));
        record.set("type", "education");
        record.set_opt("facility_type", pick_str(row, &["facility_type", "school_type", "type"]));
        record.set_opt("damaged", ctx.count(row, &["schools_damaged", "damaged", "partially_damaged"]));
        record.set_opt("destroyed", ctx.count(row, &["schools_destroyed", "destroyed", "fully_destroyed"]));
        record.set_opt(
            "students_affected",
            ctx.count(row, &["students_affected", "affected_students", "students"]),
        );
        record.set_opt("students_killed", ctx.count(row, &["students_killed"]));
        record.set_opt("staff_killed", ctx.count(row, &["staff_killed", "teachers_killed"]));
        record
    })
}

/// Water, sanitation and hygiene facility status.
pub fn transform_water(payload: &RawPayload, source: &str) -> Result<Transformed, PayloadError> {
    map_rows(payload, |row, ctx| {
        let date = ctx.date(row, DATE);
        let mut record = base_record(source, date, pick_str(row, LOCATION));
        record.set("type", "water");
        record.set_opt("facility_type", pick_str(row, &["facility_type", "facility", "asset_type", "type"]));
        record.set_opt("status", pick_str(row, &["status", "functionality", "operational_status"]));
        record.set_opt(
            "people_affected",
            ctx.count(row, &["people_affected", "population_served", "beneficiaries", "affected"]),
        );
        record
    })
}

/// Damaged or destroyed structures.
pub fn transform_infrastructure(
    payload: &RawPayload,
    source: &str,
) -> Result<Transformed, PayloadError> {
    map_rows(payload, |row, ctx| {
        let date = ctx.date(row, DATE);
        let mut record = base_record(source, date, pick_str(row, LOCATION));
        record.set_opt(
            "type",
            pick_str(row, &["structure_type", "infrastructure_type", "type", "category", "sector"]),
        );
        record.set_opt("damage_level", pick_str(row, &["damage_level", "damage", "status"]));
        record.set_opt("count", ctx.count(row, &["count", "structures", "units", "number", "value"]));
        record
    })
}

/// Displacement figures.
pub fn transform_refugees(payload: &RawPayload, source: &str) -> Result<Transformed, PayloadError> {
    map_rows(payload, |row, ctx| {
        let date = ctx.date(row, DATE);
        let location = pick_str(row, LOCATION).or_else(|| pick_str(row, &["country"]));
        let mut record = base_record(source, date, location);
        record.set_opt("population_type", pick_str(row, &["population_type", "type"]));
        record.set_opt(
            "displaced",
            ctx.count(row, &["displaced", "idps", "individuals", "population", "total", "value"]),
        );
        record.set_opt("households", ctx.count(row, &["households", "families"]));
        record
    })
}

/// Needs, targets and reach by sector.
pub fn transform_humanitarian(
    payload: &RawPayload,
    source: &str,
) -> Result<Transformed, PayloadError> {
    map_rows(payload, |row, ctx| {
        let date = ctx.date(row, DATE);
        let mut record = base_record(source, date, pick_str(row, LOCATION));
        record.set_opt("sector", pick_str(row, &["sector", "cluster"]));
        record.set_opt("people_in_need", ctx.count(row, &["people_in_need", "pin", "in_need"]));
        record.set_opt("people_targeted", ctx.count(row, &["people_targeted", "targeted"]));
        record.set_opt("people_reached", ctx.count(row, &["people_reached", "reached"]));
        record.set_opt(
            "funding_required",
            ctx.float(row, &["funding_required", "requirements", "required_usd"]).map(super::float_value),
        );
        record.set_opt(
            "funding_received",
            ctx.float(row, &["funding_received", "funding", "received_usd"]).map(super::float_value),
        );
        record
    })
}
