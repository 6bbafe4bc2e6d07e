//! Care routing - map a diagnosis to a specialty and urgency, and find nearby
//! facilities through OpenStreetMap (Nominatim geocoding, Overpass search).

use crate::inference::{env_or_default, env_parse};
use crate::{AgentError, Result};
use healthguard_core::DiagnosisItem;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument};

pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";
pub const DEFAULT_OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";
pub const DEFAULT_SEARCH_RADIUS_KM: f64 = 10.0;
const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = "HealthGuard/0.1 (clinical decision support)";
const EARTH_RADIUS_KM: f64 = 6371.0;

/// How soon the patient should be seen
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Emergency,
    Urgent,
    Routine,
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Emergency => "Emergency",
            Self::Urgent => "Urgent",
            Self::Routine => "Routine",
        };
        write!(f, "{}", name)
    }
}

/// Specialty routing for one known condition
#[derive(Debug)]
pub struct CareProfile {
    pub condition: &'static str,
    pub specialty: &'static str,
    /// Value searched for in OSM `healthcare:speciality`; `None` means any
    /// emergency department will do
    pub osm_specialty: Option<&'static str>,
    pub urgency: Urgency,
}

pub const CONDITION_SPECIALTY: &[CareProfile] = &[
    CareProfile {
        condition: "Community-Acquired Pneumonia (CAP)",
        specialty: "Pulmonology",
        osm_specialty: Some("pneumology"),
        urgency: Urgency::Urgent,
    },
    CareProfile {
        condition: "Acute Heart Failure / Decompensated Heart Failure",
        specialty: "Cardiology",
        osm_specialty: Some("cardiology"),
        urgency: Urgency::Emergency,
    },
    CareProfile {
        condition: "Acute Coronary Syndrome (ACS)",
        specialty: "Cardiology (Interventional)",
        osm_specialty: Some("cardiology"),
        urgency: Urgency::Emergency,
    },
    CareProfile {
        condition: "COPD Exacerbation",
        specialty: "Pulmonology",
        osm_specialty: Some("pneumology"),
        urgency: Urgency::Urgent,
    },
    CareProfile {
        condition: "Asthma Exacerbation",
        specialty: "Pulmonology / Allergy",
        osm_specialty: Some("pneumology"),
        urgency: Urgency::Urgent,
    },
    CareProfile {
        condition: "Pulmonary Embolism (PE)",
        specialty: "Pulmonology / Vascular Medicine",
        osm_specialty: Some("pneumology"),
        urgency: Urgency::Emergency,
    },
    CareProfile {
        condition: "Sepsis",
        specialty: "Critical Care / Emergency Medicine",
        osm_specialty: None,
        urgency: Urgency::Emergency,
    },
    CareProfile {
        condition: "Acute Ischemic Stroke",
        specialty: "Neurology (Stroke Center)",
        osm_specialty: Some("neurology"),
        urgency: Urgency::Emergency,
    },
    CareProfile {
        condition: "Type 2 Diabetes - Acute Complications",
        specialty: "Endocrinology",
        osm_specialty: Some("endocrinology"),
        urgency: Urgency::Urgent,
    },
    CareProfile {
        condition: "COVID-19",
        specialty: "Infectious Disease / Pulmonology",
        osm_specialty: Some("infectious_diseases"),
        urgency: Urgency::Urgent,
    },
];

/// Checked in order after exact and substring matching fail
const CONDITION_KEYWORDS: &[(&str, &str)] = &[
    ("pneumonia", "Community-Acquired Pneumonia (CAP)"),
    ("heart failure", "Acute Heart Failure / Decompensated Heart Failure"),
    ("coronary", "Acute Coronary Syndrome (ACS)"),
    ("acs", "Acute Coronary Syndrome (ACS)"),
    ("myocardial infarction", "Acute Coronary Syndrome (ACS)"),
    ("stemi", "Acute Coronary Syndrome (ACS)"),
    ("nstemi", "Acute Coronary Syndrome (ACS)"),
    ("copd", "COPD Exacerbation"),
    ("chronic obstructive", "COPD Exacerbation"),
    ("asthma", "Asthma Exacerbation"),
    ("pulmonary embolism", "Pulmonary Embolism (PE)"),
    ("embolism", "Pulmonary Embolism (PE)"),
    ("sepsis", "Sepsis"),
    ("septic", "Sepsis"),
    ("stroke", "Acute Ischemic Stroke"),
    ("cerebrovascular", "Acute Ischemic Stroke"),
    ("diabetes", "Type 2 Diabetes - Acute Complications"),
    ("diabetic ketoacidosis", "Type 2 Diabetes - Acute Complications"),
    ("dka", "Type 2 Diabetes - Acute Complications"),
    ("hhs", "Type 2 Diabetes - Acute Complications"),
    ("covid", "COVID-19"),
    ("sars-cov", "COVID-19"),
];

fn profile(condition: &str) -> Option<&'static CareProfile> {
    CONDITION_SPECIALTY.iter().find(|p| p.condition == condition)
}

/// Resolve a free-form condition name: exact match, then substring either
/// way, then keywords. Case-insensitive.
pub fn match_condition(name: &str) -> Option<&'static CareProfile> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return None;
    }

    if let Some(p) = CONDITION_SPECIALTY.iter().find(|p| p.condition.to_lowercase() == name) {
        return Some(p);
    }

    if let Some(p) = CONDITION_SPECIALTY.iter().find(|p| {
        let key = p.condition.to_lowercase();
        key.contains(&name) || name.contains(&key)
    }) {
        return Some(p);
    }

    CONDITION_KEYWORDS
        .iter()
        .find(|(keyword, _)| name.contains(keyword))
        .and_then(|(_, condition)| profile(condition))
}

/// Specialty and urgency for one diagnosis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CareRecommendation {
    /// Canonical condition name when matched, else the name as given
    pub condition: String,
    pub matched: bool,
    pub specialty: String,
    pub urgency: Urgency,
    pub osm_specialty: Option<String>,
}

/// Route a diagnosis item; unknown conditions go to general medicine
pub fn recommend_care(item: &DiagnosisItem) -> CareRecommendation {
    match match_condition(&item.condition_name) {
        Some(p) => CareRecommendation {
            condition: p.condition.to_string(),
            matched: true,
            specialty: p.specialty.to_string(),
            urgency: p.urgency,
            osm_specialty: p.osm_specialty.map(str::to_string),
        },
        None => CareRecommendation {
            condition: item.condition_name.clone(),
            matched: false,
            specialty: "General Medicine".into(),
            urgency: Urgency::Routine,
            osm_specialty: None,
        },
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(AgentError::Config(format!("invalid coordinates: {}, {}", lat, lon)));
        }
        Ok(Self { lat, lon })
    }
}

/// Great-circle distance in kilometres
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (phi1, phi2) = (a.lat.to_radians(), b.lat.to_radians());
    let dphi = (b.lat - a.lat).to_radians();
    let dlambda = (b.lon - a.lon).to_radians();

    let h = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FacilityKind {
    Hospital,
    Clinic,
    Doctor,
    Other,
}

impl std::fmt::Display for FacilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Hospital => "Hospital",
            Self::Clinic => "Clinic",
            Self::Doctor => "Doctor",
            Self::Other => "Medical Facility",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Facility {
    pub name: String,
    pub kind: FacilityKind,
    pub location: GeoPoint,
    /// Rounded to two decimals
    pub distance_km: f64,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub specialty: Option<String>,
    pub specialty_match: bool,
    pub emergency: bool,
}

/// Overpass QL for hospitals, clinics and doctors within `radius_km`
pub fn overpass_query(origin: GeoPoint, radius_km: f64) -> String {
    let around = format!("(around:{},{},{})", (radius_km * 1000.0).round() as u64, origin.lat, origin.lon);
    let selectors = [
        ("node", "amenity", "hospital"),
        ("way", "amenity", "hospital"),
        ("relation", "amenity", "hospital"),
        ("node", "amenity", "clinic"),
        ("way", "amenity", "clinic"),
        ("node", "healthcare", "hospital"),
        ("way", "healthcare", "hospital"),
        ("node", "healthcare", "clinic"),
        ("way", "healthcare", "clinic"),
        ("node", "healthcare", "doctor"),
        ("way", "healthcare", "doctor"),
    ];

    let mut query = String::from("[out:json][timeout:25];\n(\n");
    for (element, key, value) in selectors {
        query.push_str(&format!("  {}[\"{}\"=\"{}\"]{};\n", element, key, value, around));
    }
    query.push_str(");\nout center tags;\n");
    query
}

fn tag<'a>(tags: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| tags.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

fn facility_kind(tags: &Value) -> FacilityKind {
    let types = [tag(tags, &["amenity"]), tag(tags, &["healthcare"])];
    let has = |needle: &str| types.iter().flatten().any(|t| t.contains(needle));
    if has("hospital") {
        FacilityKind::Hospital
    } else if has("clinic") {
        FacilityKind::Clinic
    } else if has("doctor") {
        FacilityKind::Doctor
    } else {
        FacilityKind::Other
    }
}

fn address(tags: &Value) -> Option<String> {
    let parts: Vec<&str> = ["addr:housenumber", "addr:street", "addr:city", "addr:postcode", "addr:state"]
        .iter()
        .filter_map(|key| tag(tags, &[*key]))
        .collect();
    if parts.is_empty() {
        tag(tags, &["addr:full"]).map(str::to_string)
    } else {
        Some(parts.join(", "))
    }
}

/// Turn an Overpass response into facilities.
///
/// Unnamed elements and elements without coordinates are skipped; the first
/// element with a given name wins.
pub fn parse_overpass(response: &Value, origin: GeoPoint, target_specialty: Option<&str>) -> Vec<Facility> {
    let target = target_specialty.map(str::to_lowercase);
    let mut facilities: Vec<Facility> = Vec::new();

    let Some(elements) = response.get("elements").and_then(Value::as_array) else {
        return facilities;
    };

    for element in elements {
        let tags = element.get("tags").unwrap_or(&Value::Null);
        let Some(name) = tag(tags, &["name"]) else {
            continue;
        };
        if facilities.iter().any(|f| f.name == name) {
            continue;
        }

        let center = element.get("center").unwrap_or(&Value::Null);
        let coordinate = |key: &str| {
            element
                .get(key)
                .and_then(Value::as_f64)
                .or_else(|| center.get(key).and_then(Value::as_f64))
        };
        let (Some(lat), Some(lon)) = (coordinate("lat"), coordinate("lon")) else {
            continue;
        };
        let location = GeoPoint { lat, lon };

        let specialty = tag(tags, &["healthcare:speciality"]).map(str::to_string);
        let specialty_match = match (&target, &specialty) {
            (Some(target), Some(specialty)) => specialty.to_lowercase().contains(target.as_str()),
            _ => false,
        };

        facilities.push(Facility {
            name: name.to_string(),
            kind: facility_kind(tags),
            location,
            distance_km: (haversine_km(origin, location) * 100.0).round() / 100.0,
            address: address(tags),
            phone: tag(tags, &["phone", "contact:phone"]).map(str::to_string),
            website: tag(tags, &["website", "contact:website"]).map(str::to_string),
            specialty,
            specialty_match,
            emergency: tag(tags, &["emergency"]) == Some("yes"),
        });
    }

    facilities
}

/// Specialty matches first, then emergency departments, then nearest
pub fn rank_facilities(facilities: &mut [Facility]) {
    facilities.sort_by(|a, b| {
        b.specialty_match
            .cmp(&a.specialty_match)
            .then(b.emergency.cmp(&a.emergency))
            .then(a.distance_km.total_cmp(&b.distance_km))
    });
}

/// Recommendation plus the ranked facilities around one location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CareReport {
    pub recommendation: CareRecommendation,
    pub origin: GeoPoint,
    pub radius_km: f64,
    pub facilities: Vec<Facility>,
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

/// Nominatim and Overpass client
#[derive(Clone)]
pub struct CareFinder {
    client: Client,
    nominatim_url: String,
    overpass_url: String,
    timeout: Duration,
}

impl CareFinder {
    pub fn new(nominatim_url: impl Into<String>, overpass_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            nominatim_url: nominatim_url.into(),
            overpass_url: overpass_url.into(),
            timeout: Duration::from_secs(DEFAULT_LOOKUP_TIMEOUT_SECS),
        })
    }

    /// Public endpoints unless `NOMINATIM_URL` / `OVERPASS_URL` override them
    pub fn from_env() -> Result<Self> {
        let timeout = env_parse("CARE_LOOKUP_TIMEOUT_SECS", DEFAULT_LOOKUP_TIMEOUT_SECS).max(1);
        Ok(Self::new(
            env_or_default("NOMINATIM_URL", DEFAULT_NOMINATIM_URL),
            env_or_default("OVERPASS_URL", DEFAULT_OVERPASS_URL),
        )?
        .with_timeout(Duration::from_secs(timeout)))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn overpass_url(&self) -> &str {
        &self.overpass_url
    }

    /// First Nominatim match for a free-text place, if any
    #[instrument(skip(self))]
    pub async fn geocode(&self, place: &str) -> Result<Option<GeoPoint>> {
        let places: Vec<NominatimPlace> = self
            .client
            .get(&self.nominatim_url)
            .query(&[("q", place), ("format", "json"), ("limit", "1")])
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(first) = places.first() else {
            debug!("No geocoding match for {}", place);
            return Ok(None);
        };
        let parse = |value: &str| {
            value
                .trim()
                .parse::<f64>()
                .map_err(|_| AgentError::Lookup(format!("bad coordinate from geocoder: {}", value)))
        };
        GeoPoint::new(parse(&first.lat)?, parse(&first.lon)?).map(Some)
    }

    /// Ranked facilities within `radius_km` of `origin`
    #[instrument(skip(self))]
    pub async fn nearby(
        &self,
        origin: GeoPoint,
        radius_km: f64,
        target_specialty: Option<&str>,
    ) -> Result<Vec<Facility>> {
        if !(radius_km.is_finite() && radius_km > 0.0) {
            return Err(AgentError::Config(format!("search radius must be positive, got {}", radius_km)));
        }

        let response: Value = self
            .client
            .post(&self.overpass_url)
            .form(&[("data", overpass_query(origin, radius_km))])
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut facilities = parse_overpass(&response, origin, target_specialty);
        rank_facilities(&mut facilities);
        info!("Found {} facilities within {} km", facilities.len(), radius_km);
        Ok(facilities)
    }

    /// Route `item` and list facilities around `origin`
    pub async fn recommend(&self, item: &DiagnosisItem, origin: GeoPoint, radius_km: f64) -> Result<CareReport> {
        let recommendation = recommend_care(item);
        let facilities = self
            .nearby(origin, radius_km, recommendation.osm_specialty.as_deref())
            .await?;
        Ok(CareReport {
            recommendation,
            origin,
            radius_km,
            facilities,
        })
    }
}
