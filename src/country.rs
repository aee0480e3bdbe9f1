//! # Country keys
//! Canonical country names used as the identity for queueing and caching.
//!
//! Map data and model output spell countries in many ways ("United States of
//! America", "USA", "Dem. Rep. Congo"). Everything downstream of this module
//! only ever sees the canonical spelling produced by [`normalize_country_name`].

use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Canonical country name. Constructing one always normalizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CountryKey(String);

impl CountryKey {
    pub fn new(raw: &str) -> Self {
        Self(normalize_country_name(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for CountryKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for CountryKey {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<CountryKey> for String {
    fn from(key: CountryKey) -> Self {
        key.0
    }
}

impl fmt::Display for CountryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CountryKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonical names for the full background sweep.
pub const ALL_COUNTRIES: &[&str] = &[
    "Afghanistan", "Albania", "Algeria", "Angola", "Argentina", "Armenia", "Australia",
    "Austria", "Azerbaijan", "Bahamas", "Bangladesh", "Belarus", "Belgium", "Belize", "Benin",
    "Bhutan", "Bolivia", "Bosnia and Herzegovina", "Botswana", "Brazil", "Brunei", "Bulgaria",
    "Burkina Faso", "Burundi", "Cambodia", "Cameroon", "Canada", "Central African Republic",
    "Chad", "Chile", "China", "Colombia", "Costa Rica", "Croatia", "Cuba", "Cyprus",
    "Czech Republic", "DR Congo", "Denmark", "Djibouti", "Dominican Republic", "Ecuador",
    "Egypt", "El Salvador", "Equatorial Guinea", "Eritrea", "Estonia", "Eswatini", "Ethiopia",
    "Falkland Islands", "Fiji", "Finland", "France", "Gabon", "Gambia", "Georgia", "Germany",
    "Ghana", "Greece", "Greenland", "Guatemala", "Guinea", "Guinea-Bissau", "Guyana", "Haiti",
    "Honduras", "Hungary", "Iceland", "India", "Indonesia", "Iran", "Iraq", "Ireland", "Israel",
    "Italy", "Ivory Coast", "Jamaica", "Japan", "Jordan", "Kazakhstan", "Kenya", "Kosovo",
    "Kuwait", "Kyrgyzstan", "Laos", "Latvia", "Lebanon", "Lesotho", "Liberia", "Libya",
    "Lithuania", "Luxembourg", "Madagascar", "Malawi", "Malaysia", "Mali", "Mauritania",
    "Mexico", "Moldova", "Mongolia", "Montenegro", "Morocco", "Mozambique", "Myanmar",
    "Namibia", "Nepal", "Netherlands", "New Caledonia", "New Zealand", "Nicaragua", "Niger",
    "Nigeria", "North Korea", "North Macedonia", "Northern Cyprus", "Norway", "Oman",
    "Pakistan", "Palestine", "Panama", "Papua New Guinea", "Paraguay", "Peru", "Philippines",
    "Poland", "Portugal", "Puerto Rico", "Qatar", "Republic of the Congo", "Romania", "Russia",
    "Rwanda", "Saudi Arabia", "Senegal", "Serbia", "Sierra Leone", "Slovakia", "Slovenia",
    "Solomon Islands", "Somalia", "Somaliland", "South Africa", "South Korea", "South Sudan",
    "Spain", "Sri Lanka", "Sudan", "Suriname", "Sweden", "Switzerland", "Syria", "Taiwan",
    "Tajikistan", "Tanzania", "Thailand", "Timor-Leste", "Togo", "Trinidad and Tobago",
    "Tunisia", "Turkey", "Turkmenistan", "Uganda", "Ukraine", "United Arab Emirates",
    "United Kingdom", "United States", "Uruguay", "Uzbekistan", "Vanuatu", "Venezuela",
    "Vietnam", "Western Sahara", "Yemen", "Zambia", "Zimbabwe",
];

// Lowercased alias -> canonical name. Targets must be entries of ALL_COUNTRIES.
static ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("united states of america", "United States"),
        ("usa", "United States"),
        ("us", "United States"),
        ("u.s.", "United States"),
        ("u.s.a.", "United States"),
        ("america", "United States"),
        ("uk", "United Kingdom"),
        ("u.k.", "United Kingdom"),
        ("great britain", "United Kingdom"),
        ("britain", "United Kingdom"),
        ("russian federation", "Russia"),
        ("dem. rep. congo", "DR Congo"),
        ("democratic republic of the congo", "DR Congo"),
        ("congo (kinshasa)", "DR Congo"),
        ("congo", "Republic of the Congo"),
        ("congo (brazzaville)", "Republic of the Congo"),
        ("central african rep.", "Central African Republic"),
        ("bosnia and herz.", "Bosnia and Herzegovina"),
        ("dominican rep.", "Dominican Republic"),
        ("s. sudan", "South Sudan"),
        ("eq. guinea", "Equatorial Guinea"),
        ("côte d'ivoire", "Ivory Coast"),
        ("cote d'ivoire", "Ivory Coast"),
        ("eswatini", "Eswatini"),
        ("swaziland", "Eswatini"),
        ("solomon is.", "Solomon Islands"),
        ("falkland is.", "Falkland Islands"),
        ("n. cyprus", "Northern Cyprus"),
        ("czechia", "Czech Republic"),
        ("macedonia", "North Macedonia"),
        ("w. sahara", "Western Sahara"),
        ("east timor", "Timor-Leste"),
        ("burma", "Myanmar"),
        ("korea, republic of", "South Korea"),
        ("republic of korea", "South Korea"),
        ("korea", "South Korea"),
        ("dem. rep. korea", "North Korea"),
        ("democratic people's republic of korea", "North Korea"),
        ("lao pdr", "Laos"),
        ("viet nam", "Vietnam"),
        ("iran (islamic republic of)", "Iran"),
        ("syrian arab republic", "Syria"),
        ("türkiye", "Turkey"),
        ("turkiye", "Turkey"),
        ("uae", "United Arab Emirates"),
        ("the bahamas", "Bahamas"),
        ("the gambia", "Gambia"),
        ("the netherlands", "Netherlands"),
        ("holland", "Netherlands"),
        ("united republic of tanzania", "Tanzania"),
        ("palestinian territories", "Palestine"),
        ("state of palestine", "Palestine"),
    ])
});

// Lowercased canonical name -> canonical spelling.
static CANONICAL: Lazy<HashMap<String, &'static str>> = Lazy::new(|| {
    ALL_COUNTRIES
        .iter()
        .map(|name| (name.to_lowercase(), *name))
        .collect()
});

/// Map any raw spelling to its canonical key.
///
/// Total and idempotent: unknown names come back trimmed with whitespace
/// collapsed, known aliases and case variants resolve to the canonical form,
/// and a canonical name maps to itself.
pub fn normalize_country_name(raw: &str) -> String {
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("static regex"));
    let collapsed = re_ws.replace_all(raw.trim(), " ").to_string();

    let lower = collapsed.to_lowercase();
    if let Some(canonical) = ALIASES.get(lower.as_str()) {
        return (*canonical).to_string();
    }
    if let Some(canonical) = CANONICAL.get(&lower) {
        return (*canonical).to_string();
    }
    collapsed
}

/// All canonical keys, in sweep order.
pub fn all_country_keys() -> Vec<CountryKey> {
    ALL_COUNTRIES.iter().map(|n| CountryKey::new(n)).collect()
}
