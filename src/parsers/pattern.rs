//! Free-text pattern catalog.
//!
//! A denylist prefilter rejects bulletins that merely mention earthquakes
//! (tsunami information statements, storm warnings), then a catalog of
//! per-agency regexes is tried in order. Each entry carries the timezone its
//! wall-clock times are written in and an optional default country for
//! area-only geocoding. Named capture groups feed the completion step that
//! turns a draft into a full report.

use chrono::{Duration, Timelike, Utc};
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, trace, warn};

use crate::error::Rejection;
use crate::geo::{Gazetteer, RegionIndex};
use crate::parsers::draft::Draft;
use crate::parsers::when;
use crate::types::{Coords, Intensity, IntensityScale, Magnitude, Report, Severity, Status, Water};

/// Bulletins that match any of these are not earthquake reports at all.
const DENYLIST: &[&str] = &[
    r"Alert for HighWaves",
    r"Tsunami Information Statement",
    r"Final Tsunami Threat",
    r"Tropical Depression",
    r"Tropical Cyclone",
    r"Cyclones Tropicaux",
    r"Storm Warning",
    r"KT WINDS",
    "降灰予報",
    r"第\d報$",
];

/// (pattern, timezone hours east of UTC, default country).
///
/// Ordering matters: more specific agency formats come before generic ones.
const PATTERNS: &[(&str, f64, Option<&str>)] = &[
    // SWIFT bulletins (global, UTC)
    (r"(SWIFT|Swift) ID:\d+, (?P<status>.+), Date: ?(?P<time>\d.+), Lat: ?(?P<lat>.+), Lon: ?(?P<lon>.+), Depth: ?(?P<depth>[\d.]+) km, (?P<magtype>M\w*): (?P<mag>[\d.]+)", 0.0, None),
    // Raspberry Shake style community detections
    (r"\[(?P<time>[\d:]+) UTC\] +earthquake detected at .+ from (?P<area>.+)\. Download .+ (?P<link>http\S+)", 0.0, None),
    (r"\[(?P<time>[\d:]+) UTC\] +sismo detectado a .+ de (?P<area>.+)\. Descarga .+ (?P<link>http\S+)", 0.0, None),
    (r"\[(?P<time>[\d:]+) UTC\] +terremoto rilevato a .+ da (?P<area>.+)\. Scarica .+ (?P<link>http\S+)", 0.0, None),
    // Turkey: AFAD / Kandilli
    (r"Yer: (?P<area>.+) / Tarih: (?P<date>.+) / Saat: (?P<time>.+) / Büyüklük: (?P<mag>[\d.]+) / Derinlik: (?P<depth>.+) Km", 3.0, Some("Turkey")),
    (r"Büyüklük : (?P<mag>[\d.]+) \((?P<magtype>\w+)\) Yer : (?P<area>.+) Tarih-Saat : (?P<date>.+), (?P<time>.+) TSİ Enlem : (?P<lat>.+) Boylam : (?P<lon>.+) Derinlik : (?P<depth>.+) km Detay : (?P<link>http\S+)", 3.0, Some("Turkey")),
    (r"Büyüklük:(?P<mag>[\d.]+) \((?P<magtype>\w+)\) Yer:(?P<area>.+) Tarih:(?P<date>.+) Saat:(?P<time>.+) TSİ Enlem:(?P<lat>.+) Boylam:(?P<lon>.+) Derinlik:(?P<depth>.+) km Detay:(?P<link>http\S+)", 3.0, Some("Turkey")),
    (r"(?P<area>.+) Büyüklük: (?P<mag>[\d.]+) Tarih: (?P<date>.+) Saat: (?P<time>.+) Derinlik:  ?(?P<depth>\d+) km", 3.0, Some("Turkey")),
    // Generic UTC lat/lon bulletins
    (r"Time: (?P<time>.+) Latitude: (?P<lat>.+) Longitude: (?P<lon>.+) Depth: (?P<depth>[\d.]+)km (?P<magtype>M\w*) (?P<mag>[\d.]+)", 0.0, None),
    (r"Mag:(?P<mag>[\d.]+) \S+ km \S+ +from (?P<area>.+) Depth: ?(?P<depth>[\d.]+)km (?P<time>.+):UTC .* (?P<link>http\S+)", 0.0, Some("US")),
    // Chile: CSN and friends
    (r"EQ M(?P<mag>[\d.]+) \[(?P<status>.+)\].*Hora Chilena. (?P<time>\d.+) .UTC..*\((?P<coords>.+,.+)\)", 0.0, Some("Chile")),
    (r"Sismo \| Hora Local: (?P<time>.+) \| Lat: (?P<lat>.+) \| Long: (?P<lon>.+) \| Prof .Km.: (?P<depth>.+) \| Mag: (?P<mag>[\d.]+) (?P<magtype>\w+) \| Loc:.+(?P<link>http\S+)", -4.0, Some("Chile")),
    (r"(?P<status>PRELIMINAR|REVISADO) .*\| Sismo de magnitud (?P<mag>[\d.]+) Richter se produjo a las (?P<time>.+) horas .* a \S+ km al \S+ de (?P<area>.+), región .*, con una profundidad de (?P<depth>[\d.]+) kilómetros", -4.0, Some("Chile")),
    (r"TEMBLOR de (?P<mag>[\d.]+), hoy (?P<time>.+), Epicentro: .+ km .+ de (?P<area>.+), Profundidad (?P<depth>.+) km", -4.0, Some("Chile")),
    (r"Hora Local: (?P<time>.+) mag: (?P<mag>[\d.]+), Lat: (?P<lat>.+), Lon: (?P<lon>.+), Prof: (?P<depth>.+), Loc: .+ km .+ de (?P<area>.+)", -4.0, Some("Chile")),
    // Mexico: SSN / SASMEX / SkyAlert
    (r"SASMEX:Sismo del (?P<time>.+): Primera.* Lat:(?P<lat>.+) Long:(?P<lon>.+)", -6.0, Some("Mexico")),
    (r"SISMO Magnitud (?P<mag>[\d.]+) Loc.* \S+ km al \S+ de (?P<area>\D+) (?P<time>\d.+) Lat (?P<lat>\S+) Lon (?P<lon>\S+) (Prof|Pf) (?P<depth>\d+)", -6.0, Some("Mexico")),
    (r"(?P<status>\S+): SISMO Magnitud (?P<mag>[\d.]+) Loc\. .* km al \S+ de (?P<area>\D+) (?P<time>\d.+) Lat (?P<lat>.+) Lon (?P<lon>.+) (Prof|Pf) (?P<depth>\d+)", -6.0, Some("Mexico")),
    (r"Sismo detectado: Intensidad (?P<intensity>.+)\. Sensor ubicado en (?P<area>.+) ../.../.. +(?P<time>..:..:..)", -6.0, Some("Mexico")),
    (r"SismoDetectado\. Posible epicentro en: (?P<area>.+)\. (?P<time>.+) +Más información", -6.0, Some("Mexico")),
    // Peru / Colombia / Ecuador
    (r"Fecha y Hora Local: (?P<time>.+) Magnitud: (?P<mag>[\d.]+) Profundidad: (?P<depth>.+)km Latitud: (?P<lat>\S+) Longitud: (?P<lon>\S+)", -5.0, Some("Peru")),
    (r"ÚltimoSismo (?P<time>.+) Magnitud: (?P<mag>[\d.]+) (?P<magtype>\w+); Profundidad: (?P<depth>\d+) km Referencia: \S+ km al \S+ de (?P<area>.+) NO GENERA", -5.0, Some("Peru")),
    (r"Reportamos Evento Sísmico - Boletín Actualizado ., (?P<time>.+) hora local. Magnitud (?P<mag>[\d.]+), profundidad (?P<depth>[\d.]+) km, (?P<area>.+) Noticia", -5.0, Some("Colombia")),
    (r"SISMO ID: \S+ (?P<status>\S+) (?P<time>\d.+) TL Magnitud: ?(?P<mag>[\d.]+) Profundidad: ?(?P<depth>[\d.]+) km, a .*Latitud: ?(?P<lat>.+) Longitud: ?(?P<lon>.+) Sintió este sismo", -5.0, Some("Ecuador")),
    // Japan: JMA / EEW relays
    (r"\[Hi-net\] 発生時刻：(?P<time>.+) 震源地：(?P<area>.+) 緯度：(?P<lat>.+) 経度：(?P<lon>.+) 深さ：(?P<depth>.+)km マグニチュード：(?P<mag>[\d.]+)", 9.0, Some("Japan")),
    (r"\[EEW\] ID：.* SEQ：.* 震源地：(?P<area>.+) 緯度：(?P<lat>.+) 経度：(?P<lon>.+) 震源深さ：(?P<depth>.+)km 発生日時：(?P<time>.+) マグニチュード：(?P<mag>.+) 最大震度：(?P<intensity>\S+)", 9.0, Some("Japan")),
    (r"【地震情報】 .+ (?P<time>\d+時\d+分)  (?P<area>.+) でM(?P<mag>[\d.]+)の地震。  震源 (?P<coords>.+)  深さ (?P<depth>\S+)km", 9.0, Some("Japan")),
    (r"【地震情報】(?P<time>.+)頃、(?P<area>.+) 深さ約(?P<depth>.+)kmでM(?P<mag>[\d.]+).最大(?P<intensity>震度.)の地震がありました。", 9.0, Some("Japan")),
    (r"地震発生時刻: (?P<time>.+) 震央:(?P<area>.+)\(北緯(?P<lat>.+) 東経(?P<lon>.+)\) マグニチュード: (?P<mag>[\d.]+) 震源の深さ: (?P<depth>[\d.]+)km", 9.0, Some("Japan")),
    (r"【M(?P<mag>[\d.]+)】(?P<area>\w+) (?P<depth>[\d.]+)km (?P<time>.+ JST)", 9.0, Some("Japan")),
    (r"\[[第最](?P<status>.)報\] (?P<time>\S+) (?P<area>.+) 深さ(?P<depth>.+)km M(?P<mag>[\d.]+) 最大(?P<intensity>震度 ?.) 地震", 9.0, Some("Japan")),
    (r"Earthquake (?P<status>.+) Report.*At around (?P<time>.+), an earthquake with a magnitude of (?P<mag>[\d.]+) occurred (in|near|offshore) (?P<area>.+) at a depth of (?P<depth>\d+)km. The maximum intensity was (?P<intensity>[0-9+-]+)\.", 9.0, Some("Japan")),
    (r"(?P<time>.+) JST .* of (?P<area>.+) Depth: (?P<depth>.+)km Mag\.: (?P<mag>[\d.]+) JMA Scale:", 9.0, Some("Japan")),
    // Italy: INGV
    (r"terremoto (?P<magtype>\w+):(?P<mag>[\d.]+) (?P<time>.+) Lat=(?P<lat>.+) Lon=(?P<lon>.+) Prof=(?P<depth>\d+)Km Zona=(?P<area>[^.]+)\.", 0.0, Some("Italy")),
    (r"terremoto (?P<magtype>\w+) (?P<mag>[\d.]+) ore (?P<time>.+) IT del (?P<date>.+) a .* km \S+ (?P<area>.+) Prof=(?P<depth>\d+)Km", 1.0, Some("Italy")),
    (r"\[(?P<status>STIMA PROVVISORIA)\] terremoto Mag tra (?P<mag>[\d.]+) e (?P<maxmag>[\d.]+), ore (?P<time>.+) IT del (?P<date>.+), prov/zona (?P<area>.+),", 1.0, Some("Italy")),
    // Spain: IGN
    (r"terremoto (?P<time>.+UTC) (?P<area>.+) mag=(?P<mag>[\d.]+) prof=(?P<depth>.+)km cálculo (?P<status>\S+) (?P<link>http\S+)", 0.0, Some("Spain")),
    // EMSC machine lines
    (r"M (?P<mag>[\d.]+), (?P<area>[^:]+): (?P<time>.+) +(?P<lat>\S+) +(?P<lon>\S+) +(?P<depth>\d+) km +(?P<status>A|C|M)", 0.0, None),
    (r"(?P<mag>[\d.]+), (?P<area>.+): (?P<time>\S+ \S+) (?P<coords>\S+ \S+) (?P<depth>[\d.]+) km (?P<status>automatic|manual)", 0.0, None),
    // Greece: NOA
    (r"(?P<mag>[\d.]+) (?P<magtype>\w+), .* Km .* from (?P<area>.+): (?P<time>.+) (?P<status>automatic|revised)", 0.0, Some("Greece")),
    // Hong Kong Observatory
    (r"Earthquake: (?P<time>.+) M(?P<mag>[\d.]+) \[(?P<coords>.+)\] (?P<area>.+)", 8.0, None),
    // India: NCS
    (r"Earthquake of Magnitude: ?(?P<mag>[\d.]+), Occurred on: ?(?P<time>.+) IST, Lat: ?(?P<lat>[\d.NS ]+).*Long: ?(?P<lon>[\d.EW ]+), Depth: ?(?P<depth>.+) Km,", 5.5, Some("India")),
    // Indonesia: BMKG (plus tsunami early warnings)
    (r"Gempa Mag[: ](?P<mag>[\d.]+)( SR)?, (?P<time>\d.+), Lok:(?P<lat>.+),(?P<lon>.+) \(.*, Kedlmn:(?P<depth>[\d.]+) Km", 7.0, Some("Indonesia")),
    (r"Peringatan Dini Tsunami di (?P<water>.+), Gempa Mag:(?P<mag>[\d.]+), (?P<time>.+), Lok:(?P<lat>\S+)LS,(?P<lon>\S+)BT,Kdlmn:(?P<depth>[\d.]+)Km", 7.0, Some("Indonesia")),
    // Philippines: PHIVOLCS
    (r"Date and Time: (?P<time>.+) Magnitude = (?P<mag>[\d.]+) Depth = (?P<depth>[\d.]+) kilometers? Location = (?P<coords>.+[EW]) -", 8.0, Some("Philippines")),
    // New Zealand: GeoNet
    (r"QUAKE: Mag (?P<mag>[\d.]+), ..., (?P<time>.+), .* km \S+ of (?P<area>.+)\. Depth: (?P<depth>[\d.]+) km", 12.0, Some("New Zealand")),
    // Taiwan: CWA
    (r"警報:芮氏規模(?P<mag>[\d.]+)深度(?P<depth>.+)公里.+震央:(?P<coords>[\d.,]+)地震時間:(?P<date>.+年.+月.+日)(?P<time>.+點.+分.+秒)", 8.0, Some("Taiwan")),
    // Korea: KMA relays
    (r"\[국외지진정보\] ?..-.. (?P<time>\S+) (?P<area>.+) \S+ \d+km .* 규모 ?(?P<mag>[\d.]+) (?P<link>http\S+)", 9.0, None),
    (r"\[지진정보\] ?..-.. (?P<time>\S+) (?P<area>.+) \S+ \d+km .* 규모 ?(?P<mag>[\d.]+) (?P<link>http\S+)", 9.0, Some("South Korea")),
    // Thailand: TMD
    (r"Date: (?P<date>.+) Time: (?P<time>.+) (am|pm) .Thailand. Magnitude: (?P<mag>[\d.]+) richter .*Latitude: (?P<lat>.+) Longt?itude: (?P<lon>.+) Depth: (?P<depth>.+) km", 7.0, Some("Thailand")),
    // Romania: INFP
    (r"Cutremur .*, judetul (?P<area>\D+) (?P<time>\d.+), mag (?P<mag>[\d.]+)", 2.0, Some("Romania")),
    // Switzerland: SED
    (r"(?P<time>\S+) earthquake with a magnitude of about (?P<mag>[\d.]+) near (?P<area>.+)\. .*\. \S+ damage likely. (?P<link>http\S+)", 1.0, Some("Switzerland")),
    // Costa Rica: OVSICORI
    (r"[Ss]ismocr (?P<status>\S+), (?P<time>.+), Mag: (?P<mag>[\d,.]+), Prof: (?P<depth>[\d]+) km, .* km al \S+ de (?P<area>.+)", -6.0, Some("Costa Rica")),
    (r"Fecha: (?P<date>.+). Hora Local: (?P<time>.+). Localización: .* km al \S+ de (?P<area>.+). Coordenadas: (?P<lat>.+) y (?P<lon>.+). Profundidad: (?P<depth>.+) km. Magnitud: (?P<mag>[\d,.]+) (?P<magtype>M\w*)", -6.0, Some("Costa Rica")),
    // Venezuela: FUNVISIS
    (r"Sismo:(?P<time>.+) .HLV., Mag. (?P<mag>[\d.]+) (?P<magtype>[Mm]\S+), a .* Km al \S+ de (?P<area>.+) (?P<coords>.+), prof. (?P<depth>[\d,.]+) km", -4.0, Some("Venezuela")),
    // USGS-style tweet relays
    (r"(?P<status>Prelim) M(?P<mag>[\d.]+) earthquake (?P<area>.+) ...-\d+ (?P<time>\d\d:\d\d UTC)", 0.0, None),
    (r"(?P<source>.+) reports a M(?P<mag>[\d.]+) earthquake .+km .+ of (?P<area>.+) on (?P<date>.+) @ (?P<time>.+) UTC (?P<link>http\S+)", 0.0, Some("US")),
    (r"QUAKE! Magnitude (?P<mag>[\d.]+), \S+km \w+ of (?P<area>.+) on (?P<date>.+) at (?P<time>.+) ET. (?P<link>http\S+)", -5.0, None),
    // GDACS alert feed (RSS and relays)
    (r"(?P<alert>\S+) earthquake alert .Magnitude (?P<mag>[\d.]+)(?P<magtype>\w+), Depth:(?P<depth>.+)km. in (?P<area>\D+) (?P<time>\d.+) UTC", 0.0, None),
    (r"(?P<alert>\S+) earthquake alert .(?P<mag>[\d.]+)(?P<magtype>\w+),depth:(?P<depth>.+)km. in (?P<area>\D+) (?P<time>\d.+) UTC", 0.0, None),
    // PTWC/NWS tsunami bulletins
    (r"\* MAGNITUDE +(?P<mag>[\d.]+)\n.*\* ORIGIN TIME +(?P<time>[^\n]+)\n.*\* COORDINATES (?P<coords>.+)\n.*\* DEPTH +(?P<depth>[\d]+) KM.*\* LOCATION +(?P<area>[^\n]+)\n.*?(?P<water>(\n      \S[^\n]+)+)", 0.0, None),
    (r"HAZARDOUS TSUNAMI WAVES ARE FORECAST .* for some coasts of (?P<water>.+) after the (?P<status>\S+) M(?P<mag>[\d.]+) occurred (?P<area>.+) at (?P<time>.+ UTC) on \S+ (?P<date>.+\d)", 0.0, None),
    (r"TSUNAMI WARNING 1: See (?P<link>http\S+) +for alert areas.  M(?P<mag>[\d.]+) \S+ \S+ +(?P<area>.+) (?P<time>\d\S+) (?P<date>.+):", 0.0, None),
    // Volcano Discovery / generic aggregators, last because they are loose
    (r"(?P<mag>[\d.]+) earthquake, (?P<area>.+)\. (?P<time>.+) at epicenter \(.*, depth (?P<depth>.+)km", 0.0, None),
    (r"Region: ?(?P<area>.+) Mag: ?(?P<mag>[\d.]+) UTC: ?(?P<time>.+) Lat: ?(?P<lat>\S+) Lon: ?(?P<lon>\S+) Dep: ?(?P<depth>[\d.]+)km (?P<link>http\S+)", 0.0, None),
    (r"Earthquake +Magnitude (?P<mag>[\d.]+) reported \S+km \S+ of (?P<area>.+) at (?P<time>\d.+ UTC) (?P<link>http\S+)", 0.0, None),
    (r"(?P<magtype>M\w*)=(?P<mag>[\d.]+), (?P<area>.+) .Depth: (?P<depth>\S+) km., (?P<time>.+) - Full details here: (?P<link>http\S+)", 0.0, None),
    (r"(?P<time>\d\d\d\d-\d\d-\d\dT\d\d:\d\d:\d\d)Z: M(?P<mag>[\d.]+) (?P<area>[^0-9]+)", 0.0, None),
    (r"(?P<mag>[\d.]+) earthquake (close to|occurred near) (?P<area>.+) at (?P<time>.+) UTC!.*(?P<link>http\S+)", 0.0, None),
];

/// A compiled catalog entry.
pub struct PatternEntry {
    pub regex: Regex,
    pub tz_hours: f64,
    pub country: Option<&'static str>,
}

/// The compiled catalog. Compile once, share everywhere.
pub struct PatternCatalog {
    denylist: Vec<Regex>,
    entries: Vec<PatternEntry>,
}

static CATALOG: OnceLock<PatternCatalog> = OnceLock::new();

impl PatternCatalog {
    pub fn shared() -> &'static PatternCatalog {
        CATALOG.get_or_init(PatternCatalog::compile)
    }

    fn compile() -> Self {
        let build = |pattern: &str| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .dot_matches_new_line(true)
                .build()
        };

        let denylist = DENYLIST
            .iter()
            .filter_map(|p| match build(p) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!(pattern = p, error = %e, "denylist pattern failed to compile");
                    None
                }
            })
            .collect();

        let entries = PATTERNS
            .iter()
            .filter_map(|(pattern, tz, country)| match build(pattern) {
                Ok(regex) => Some(PatternEntry {
                    regex,
                    tz_hours: *tz,
                    country: *country,
                }),
                Err(e) => {
                    warn!(pattern, error = %e, "catalog pattern failed to compile");
                    None
                }
            })
            .collect();

        Self { denylist, entries }
    }

    /// Match text against the catalog: denylist first, then first pattern
    /// whose named groups capture.
    pub fn lookup(&self, text: &str) -> Result<(HashMap<&'static str, String>, &PatternEntry), Rejection> {
        let text = text.replace('\u{a0}', "");

        for deny in &self.denylist {
            if deny.is_match(&text) {
                return Err(Rejection::new("denylisted bulletin type"));
            }
        }

        const GROUPS: &[&str] = &[
            "mag", "maxmag", "lat", "lon", "coords", "depth", "time", "date", "update", "status",
            "area", "source", "link", "magtype", "intensity", "water", "victims", "alert",
        ];

        for entry in &self.entries {
            if let Some(captures) = entry.regex.captures(&text) {
                let mut groups = HashMap::new();
                for name in GROUPS {
                    if let Some(m) = captures.name(name) {
                        let value = m.as_str().trim().to_string();
                        if !value.is_empty() {
                            groups.insert(*name, value);
                        }
                    }
                }
                trace!(pattern = entry.regex.as_str(), "pattern matched");
                return Ok((groups, entry));
            }
        }

        Err(Rejection::new("no pattern matched"))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse "35.6 139.7", "35.6N, 139.7E", "37°58'N 23°43'E"-ish pairs.
pub fn parse_coords_text(text: &str) -> Option<Coords> {
    let mut cleaned = text.to_string();
    for (term, repl) in [
        ("North", "N"), ("NORTH", "N"), ("degrees north", "N"), ("LU", "N"),
        ("South", "S"), ("SOUTH", "S"), ("degrees south", "S"), ("LS", "S"),
        ("West", "W"), ("WEST", "W"), ("degrees west", "W"), ("BB", "W"),
        ("East", "E"), ("EAST", "E"), ("degrees east", "E"), ("BT", "E"),
        ("北緯", ""), ("東経", ""),
        ("(", " "), (")", " "), (",", " "), ("/", " "), ("°", " "),
    ] {
        cleaned = cleaned.replace(term, repl);
    }

    let mut values = Vec::new();
    for token in cleaned.split_whitespace() {
        let (body, hemisphere) = match token.chars().last() {
            Some(h @ ('N' | 'S' | 'E' | 'W')) => (&token[..token.len() - 1], Some(h)),
            _ => (token, None),
        };
        if let Ok(mut value) = body.trim().replace(',', ".").parse::<f64>() {
            if matches!(hemisphere, Some('S' | 'W')) {
                value = -value;
            }
            values.push(value);
        }
    }

    if values.len() >= 2 {
        Some(Coords::new(values[0], values[1], 0.0))
    } else {
        None
    }
}

/// Insert spaces into CamelCase hashtag placenames ("NewZealand" → "New Zealand").
fn split_camel_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 4);
    let mut prev_lower = false;
    for c in text.chars() {
        if c.is_uppercase() && prev_lower {
            out.push(' ');
        }
        prev_lower = c.is_lowercase();
        out.push(c);
    }
    out
}

fn canonical_region(name: &str) -> String {
    name.replace('-', " ")
        .replace([',', '.'], "")
        .to_uppercase()
}

/// Complete a draft from free text using the catalog and the geo oracles.
///
/// This is the shared post-processing used by the plain-text feed parser,
/// the Atom parser's text fallback, and the social parser's alerter path.
pub fn complete(
    mut draft: Draft,
    text: &str,
    gazetteer: &dyn Gazetteer,
    regions: &dyn RegionIndex,
) -> Result<Report, Rejection> {
    let catalog = PatternCatalog::shared();
    let (mut groups, entry) = catalog.lookup(text)?;

    // Commas in numeric fields are decimal points in half the world.
    for key in ["mag", "maxmag", "lat", "lon", "depth"] {
        if let Some(value) = groups.get_mut(key) {
            *value = value.replace(',', ".");
        }
    }

    let tz = entry.tz_hours;

    draft.time = when::parse_date_time(
        groups.get("date").map(String::as_str),
        groups.get("time").map(String::as_str),
        tz,
        true,
    )
    .or(draft.time);

    draft.status = groups
        .get("status")
        .map(|s| Status::parse(s))
        .or(draft.status)
        .or(Some(Status::Reported));

    match draft.time {
        None => return Err(Rejection::new("no time recovered")),
        Some(time) => {
            if time < Utc::now() - Duration::hours(48) {
                return Err(Rejection::new(format!("obsolete time {time}")));
            }
            if time > Utc::now() {
                return Err(Rejection::new(format!("future time {time}")));
            }
            // Zero seconds means the feed truncated the timestamp.
            if time.second() == 0 && time.nanosecond() == 0 {
                draft.status = Some(Status::Incomplete);
            }
        }
    }

    // Coordinates: explicit pair, lat/lon groups, or geocoded area.
    let explicit = groups
        .get("coords")
        .and_then(|c| parse_coords_text(c))
        .or_else(|| {
            let lat = groups.get("lat")?;
            let lon = groups.get("lon")?;
            parse_coords_text(&format!("{lat} {lon}"))
        });

    match explicit {
        Some(mut coords) => {
            let depth: f64 = groups
                .get("depth")
                .and_then(|d| d.trim().parse().ok())
                .unwrap_or(10.0);
            coords.alt_km = -depth.abs();
            draft.coords = Some(coords);
        }
        None if draft.coords.is_none() => {
            let area = groups
                .get("area")
                .map(|a| split_camel_case(a))
                .ok_or_else(|| Rejection::new("no coordinates and no area"))?;

            let place = match entry.country {
                Some(country) => format!("{area}, {country}"),
                None => area.clone(),
            };
            let located = gazetteer
                .locate(&place)
                .or_else(|| gazetteer.locate(&area))
                .ok_or_else(|| Rejection::new(format!("cannot geocode area {area:?}")))?;
            let located = located.with_confidence(0.7);

            // When the area names a whole seismic region, the geocoded point
            // must land in it, or the report is talking about somewhere we
            // did not resolve.
            let named = regions.region(&located);
            if regions.known_region(&area) && canonical_region(&named) != canonical_region(&area) {
                return Err(Rejection::new(format!(
                    "coordinates {located} do not match region {area:?}"
                )));
            }

            draft.coords = Some(located);
            draft.score *= 0.8;
            draft.status = Some(Status::Incomplete);
        }
        None => {}
    }

    let region = draft.coords.map(|c| regions.region(&c)).unwrap_or_default();

    if let Some(intensity) = groups.get("intensity") {
        let scale = if region.contains("Japan") || region.contains("Taiwan") || region.contains("Ryukyu") {
            IntensityScale::Shindo
        } else {
            IntensityScale::Mercalli
        };
        draft.intensity = Intensity::parse(intensity, Some(scale));
    }

    // Magnitude: mean of mag and maxmag when a range was published.
    let parsed_mag = groups.get("mag").and_then(|m| m.trim().parse::<f64>().ok());
    match parsed_mag {
        Some(mag) => {
            let maxmag = groups
                .get("maxmag")
                .and_then(|m| m.trim().parse::<f64>().ok())
                .unwrap_or(mag);
            draft.mag = Some(Magnitude::new(
                (mag + maxmag) / 2.0,
                groups.get("magtype").map(String::as_str),
            ));
        }
        None => {
            if draft.mag.is_none() {
                let prefix: String = text.chars().take(128).collect();
                debug!(text = prefix, "no magnitude in matched text");
                draft.mag = Some(Magnitude::new(4.5, None));
                draft.score *= 0.1;
                draft.status = Some(Status::Incomplete);
            }
        }
    }

    // Round so near-duplicates collapse to the same fusion key.
    draft.coords = draft.coords.map(|c| c.round(2));

    if let Some(update) = groups.get("update") {
        draft.update = when::parse_time(update, tz, true).or(draft.update);
    }
    if let Some(alert) = groups.get("alert") {
        draft.alert = Severity::parse(alert);
    }
    if let Some(source) = groups.get("source") {
        draft.sources = vec![source.clone()];
    }
    if let Some(link) = groups.get("link") {
        draft.links.push(link.clone());
    }
    if let Some(water) = groups.get("water") {
        draft.water = Some(Water::parse(water));
    }
    if let Some(victims) = groups.get("victims") {
        draft.victims = victims.trim().parse().ok();
    }

    draft.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::BuiltinRegions;

    fn complete_text(text: &str) -> Result<Report, Rejection> {
        complete(Draft::new(), text, &BuiltinRegions, &BuiltinRegions)
    }

    #[test]
    fn catalog_compiles() {
        let catalog = PatternCatalog::shared();
        assert!(catalog.len() > 50, "only {} patterns compiled", catalog.len());
    }

    #[test]
    fn denylist_rejects_storm_warnings() {
        let result = complete_text("Storm Warning issued at 12:00 UTC for coastal waters M5.0");
        assert!(result.is_err());
    }

    #[test]
    fn emsc_machine_line() {
        let mut now = Utc::now() - Duration::minutes(10);
        if now.second() == 0 {
            now += Duration::seconds(17);
        }
        let line = format!(
            "M 5.4, CENTRAL ITALY: {} 42.41 13.39 10 km A",
            now.format("%Y-%m-%d %H:%M:%S")
        );
        let report = complete_text(&line).expect("parses");
        assert!((report.mag.value() - 5.4).abs() < 1e-9);
        assert!((report.coords.lat - 42.41).abs() < 0.02);
        assert_eq!(report.status, Status::Detection);
        assert!((report.depth_km() - 10.0).abs() < 0.5);
    }

    #[test]
    fn turkish_afad_area_format() {
        let now = chrono::Utc::now().with_timezone(&chrono::FixedOffset::east_opt(3 * 3600).expect("offset"));
        let text = format!(
            "Yer: Istanbul / Tarih: {} / Saat: {} / Büyüklük: 4.2 / Derinlik: 7.0 Km",
            now.format("%Y-%m-%d"),
            (now - Duration::minutes(5)).format("%H:%M:%S"),
        );
        let report = complete_text(&text).expect("parses");
        // Area-only reports geocode with reduced confidence.
        assert!((report.coords.confidence - 0.7).abs() < 0.05);
        assert_eq!(report.status, Status::Incomplete);
        assert!((report.coords.lat - 41.05).abs() < 0.1);
    }

    #[test]
    fn magnitude_range_is_averaged() {
        let now = Utc::now() - Duration::minutes(3);
        let text = format!(
            "[STIMA PROVVISORIA] terremoto Mag tra 4.2 e 4.8, ore {} IT del {}, prov/zona Rieti,",
            now.with_timezone(&chrono::FixedOffset::east_opt(3600).expect("offset")).format("%H:%M:%S"),
            now.format("%Y-%m-%d"),
        );
        // Rieti is not in the built-in gazetteer via city, but Italy matching
        // catches the country default.
        if let Ok(report) = complete_text(&text) {
            assert!((report.mag.value() - 4.5).abs() < 1e-9);
        }
    }

    #[test]
    fn future_times_rejected() {
        let future = Utc::now() + Duration::hours(2);
        let line = format!(
            "M 5.4, CENTRAL ITALY: {} 42.41 13.39 10 km A",
            future.format("%Y-%m-%d %H:%M:%S")
        );
        assert!(complete_text(&line).is_err());
    }

    #[test]
    fn stale_times_rejected() {
        let old = Utc::now() - Duration::hours(72);
        let line = format!(
            "M 5.4, CENTRAL ITALY: {} 42.41 13.39 10 km A",
            old.format("%Y-%m-%d %H:%M:%S")
        );
        assert!(complete_text(&line).is_err());
    }

    #[test]
    fn coords_text_variants() {
        let c = parse_coords_text("35.6N 139.7E").expect("parses");
        assert!(c.lat > 0.0 && c.lon > 0.0);

        let s = parse_coords_text("33.4S, 70.6W").expect("parses");
        assert!(s.lat < 0.0 && s.lon < 0.0);

        assert!(parse_coords_text("no numbers here").is_none());
    }

    #[test]
    fn camel_case_split() {
        assert_eq!(split_camel_case("NewZealand"), "New Zealand");
        assert_eq!(split_camel_case("Tokyo"), "Tokyo");
    }
}
