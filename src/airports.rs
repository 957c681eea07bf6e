// Static airport reference data: regions, countries and city hubs

use serde::{Deserialize, Serialize};

const REGIONS: &[(&str, &[&str])] = &[
    (
        "Europe",
        &[
            "CDG", "ORY", "NCE", "LYS", "MRS", "TLS", "BOD", "NTE", // France
            "LHR", "LGW", "STN", "LTN", "MAN", "EDI", "GLA", "BHX", "BRS", // UK
            "DUB", "ORK", "SNN", "NOC", // Ireland
            "FRA", "MUC", "BER", "DUS", "HAM", "STR", "CGN", "LEJ", "HAJ", "NUE", // Germany
            "AMS", "EIN", "BRU", "CRL", // Benelux
            "MAD", "BCN", "PMI", "AGP", "VLC", "SVQ", "LIS", "OPO", "FAO", // Iberia
            "FCO", "MXP", "VCE", "BGY", "NAP", "PSA", "BLQ", // Italy
            "ZRH", "GVA", "VIE", "CPH", "OSL", "ARN", "HEL", "KEF", // Central & Nordic
            "WAW", "KRK", "GDN", "PRG", "BUD", "OTP", "SOF", "BEG", "SKP", "TIA", // East & Balkans
            "RIX", "VNO", "TLL", "MSQ", "KBP", //
            "ATH", "SKG", "HER", "IST", "SAW", // Southeast
        ],
    ),
    (
        "North America",
        &[
            "ATL", "LAX", "ORD", "DFW", "DEN", "JFK", "SFO", "SEA", "LAS", "MCO", "EWR", "CLT",
            "PHX", "IAH", "MIA", "YYZ", "YVR", "MEX", "BOS", "IAD",
        ],
    ),
    (
        "Asia",
        &[
            "HND", "ICN", "SIN", "HKG", "BKK", "PVG", "PEK", "NRT", "TPE", "KUL", "DEL", "BOM",
            "DXB", "DOH", "AUH", "SGN", "HAN", "MNL", "CGK",
        ],
    ),
    ("Oceania", &["SYD", "MEL", "BNE", "PER", "AKL", "CHC"]),
    ("South America", &["GRU", "BOG", "SCL", "LIM", "EZE", "GIG"]),
    ("Africa", &["JNB", "CPT", "CAI", "CAS", "NBO", "ADD"]),
];

const COUNTRIES: &[(&str, &[&str])] = &[
    ("France", &["CDG", "ORY", "NCE", "LYS", "MRS", "TLS", "BOD", "NTE"]),
    ("UK", &["LHR", "LGW", "STN", "LTN", "MAN", "EDI", "GLA", "BHX", "BRS"]),
    ("Ireland", &["DUB", "ORK", "SNN", "NOC"]),
    (
        "Germany",
        &["FRA", "MUC", "BER", "DUS", "HAM", "STR", "CGN", "LEJ", "HAJ", "NUE"],
    ),
    ("Netherlands", &["AMS", "EIN"]),
    ("Belgium", &["BRU", "CRL"]),
    ("Spain", &["MAD", "BCN", "PMI", "AGP", "VLC", "SVQ"]),
    ("Portugal", &["LIS", "OPO", "FAO"]),
    ("Italy", &["FCO", "MXP", "VCE", "BGY", "NAP", "PSA", "BLQ"]),
    ("Switzerland", &["ZRH", "GVA"]),
    ("Austria", &["VIE"]),
    ("Denmark", &["CPH"]),
    ("Norway", &["OSL"]),
    ("Sweden", &["ARN"]),
    ("Finland", &["HEL"]),
    ("Iceland", &["KEF"]),
    ("Poland", &["WAW", "KRK", "GDN"]),
    ("Czechia", &["PRG"]),
    ("Hungary", &["BUD"]),
    ("Romania", &["OTP"]),
    ("Bulgaria", &["SOF"]),
    ("Serbia", &["BEG"]),
    ("North Macedonia", &["SKP"]),
    ("Albania", &["TIA"]),
    ("Latvia", &["RIX"]),
    ("Lithuania", &["VNO"]),
    ("Estonia", &["TLL"]),
    ("Belarus", &["MSQ"]),
    ("Ukraine", &["KBP"]),
    ("Greece", &["ATH", "SKG", "HER"]),
    ("Turkey", &["IST", "SAW"]),
];

// Airports serving the same metropolitan area
const CITY_HUBS: &[(&str, &[&str])] = &[
    ("Paris", &["CDG", "ORY", "BVA"]),
    ("London", &["LHR", "LGW", "STN", "LTN", "LCY", "SEN"]),
    ("Milan", &["MXP", "LIN", "BGY"]),
    ("Rome", &["FCO", "CIA"]),
    ("Berlin", &["BER"]),
    ("Madrid", &["MAD"]),
    ("Barcelona", &["BCN"]),
    ("Istanbul", &["IST", "SAW"]),
    ("New York", &["JFK", "EWR", "LGA"]),
    ("Tokyo", &["HND", "NRT"]),
];

/// Where a discovery stage looks for destinations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    /// A named region from the static table; `"All"` covers every region.
    Named(String),
    /// An explicit list of airport codes.
    Airports(Vec<String>),
}

impl Default for Region {
    fn default() -> Self {
        Region::Named("All".to_string())
    }
}

impl Region {
    pub fn named(name: &str) -> Self {
        Region::Named(name.to_string())
    }

    /// Airport codes of the region, in table order. Unknown names yield nothing.
    pub fn airports(&self) -> Vec<String> {
        match self {
            Region::Airports(codes) => codes.iter().map(|c| c.trim().to_uppercase()).collect(),
            Region::Named(name) => {
                let name = name.trim();
                if name.is_empty() || name.eq_ignore_ascii_case("all") {
                    return REGIONS
                        .iter()
                        .flat_map(|(_, codes)| codes.iter().map(|c| c.to_string()))
                        .collect();
                }
                REGIONS
                    .iter()
                    .find(|(region, _)| region.eq_ignore_ascii_case(name))
                    .map(|(_, codes)| codes.iter().map(|c| c.to_string()).collect())
                    .unwrap_or_default()
            }
        }
    }
}

pub fn all_regions() -> Vec<&'static str> {
    REGIONS.iter().map(|(name, _)| *name).collect()
}

pub fn country_of(code: &str) -> Option<&'static str> {
    let code = code.trim().to_uppercase();
    COUNTRIES
        .iter()
        .find(|(_, codes)| codes.contains(&code.as_str()))
        .map(|(country, _)| *country)
}

pub fn hub_of(code: &str) -> Option<&'static str> {
    let code = code.trim().to_uppercase();
    CITY_HUBS
        .iter()
        .find(|(_, codes)| codes.contains(&code.as_str()))
        .map(|(hub, _)| *hub)
}

/// Region airports minus excluded countries (case-insensitive) and excluded airports.
pub fn airports_excluding(
    region: &Region,
    excluded_countries: &[String],
    excluded_airports: &[String],
) -> Vec<String> {
    let airports = region.airports();
    if excluded_countries.is_empty() && excluded_airports.is_empty() {
        return airports;
    }

    airports
        .into_iter()
        .filter(|code| !excluded_airports.iter().any(|a| a.eq_ignore_ascii_case(code)))
        .filter(|code| match country_of(code) {
            Some(country) => !excluded_countries
                .iter()
                .any(|c| c.trim().eq_ignore_ascii_case(country)),
            None => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_lookup() {
        assert_eq!(Region::named("oceania").airports().len(), 6);
        assert!(Region::named("Atlantis").airports().is_empty());

        let all = Region::default().airports();
        let total: usize = REGIONS.iter().map(|(_, codes)| codes.len()).sum();
        assert_eq!(all.len(), total);
        assert_eq!(all_regions().len(), REGIONS.len());
    }

    #[test]
    fn test_exclusions() {
        let region = Region::named("Europe");
        let airports = airports_excluding(
            &region,
            &["france".to_string()],
            &["lhr".to_string()],
        );
        assert!(!airports.iter().any(|a| a == "CDG" || a == "LYS"));
        assert!(!airports.contains(&"LHR".to_string()));
        assert!(airports.contains(&"LGW".to_string()));
    }

    #[test]
    fn test_hub_and_country() {
        assert_eq!(hub_of("ory"), Some("Paris"));
        assert_eq!(hub_of("LYS"), None);
        assert_eq!(country_of("BCN"), Some("Spain"));
        assert_eq!(country_of("JFK"), None);
    }
}
