// Entity normalization: canonical text, academic year classes, position groups.
//
// Every function here is total. Unrecognized input resolves to an UNK
// sentinel, never an error, and downstream stages treat UNK as a regular
// category.

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use unicode_normalization::UnicodeNormalization;

use crate::ingest::{FixtureRecord, RawEventRecord, RosterRecord};

// ---------------------------------------------------------------------------
// Text canonicalization
// ---------------------------------------------------------------------------

/// Trim, lowercase, fold accented characters to ASCII, and collapse runs of
/// whitespace to a single space.
pub fn canonical_text(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let folded: String = lowered.nfkd().filter(|c| c.is_ascii()).collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Academic year
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum YearClass {
    #[serde(rename = "1st")]
    First,
    #[serde(rename = "2nd")]
    Second,
    #[serde(rename = "3rd")]
    Third,
    #[serde(rename = "4th")]
    Fourth,
    #[serde(rename = "5th")]
    Fifth,
    #[serde(rename = "UNK")]
    Unknown,
}

impl YearClass {
    /// Numeric encoding used for roster averages. UNK encodes as 0, which
    /// pulls group means down when many players are unclassified; existing
    /// models are calibrated against that, so it stays.
    pub fn ordinal(self) -> u8 {
        match self {
            YearClass::First => 1,
            YearClass::Second => 2,
            YearClass::Third => 3,
            YearClass::Fourth => 4,
            YearClass::Fifth => 5,
            YearClass::Unknown => 0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            YearClass::First => "1st",
            YearClass::Second => "2nd",
            YearClass::Third => "3rd",
            YearClass::Fourth => "4th",
            YearClass::Fifth => "5th",
            YearClass::Unknown => "UNK",
        }
    }
}

impl fmt::Display for YearClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

const YEAR_SYNONYMS: &[(&str, YearClass)] = &[
    ("fr", YearClass::First),
    ("frosh", YearClass::First),
    ("freshman", YearClass::First),
    ("1", YearClass::First),
    ("1st", YearClass::First),
    ("first", YearClass::First),
    ("so", YearClass::Second),
    ("soph", YearClass::Second),
    ("sophomore", YearClass::Second),
    ("2", YearClass::Second),
    ("2nd", YearClass::Second),
    ("second", YearClass::Second),
    ("jr", YearClass::Third),
    ("junior", YearClass::Third),
    ("3", YearClass::Third),
    ("3rd", YearClass::Third),
    ("third", YearClass::Third),
    ("sr", YearClass::Fourth),
    ("senior", YearClass::Fourth),
    ("4", YearClass::Fourth),
    ("4th", YearClass::Fourth),
    ("fourth", YearClass::Fourth),
    ("5", YearClass::Fifth),
    ("5th", YearClass::Fifth),
    ("fifth", YearClass::Fifth),
];

/// Resolve free-text academic year ("Jr.", "freshman", "2nd", ...).
pub fn normalize_year(raw: &str) -> YearClass {
    let cleaned = canonical_text(raw).replace('.', "");
    let cleaned = cleaned.trim_end_matches(|c: char| c.is_ascii_punctuation());
    YEAR_SYNONYMS
        .iter()
        .find(|(text, _)| *text == cleaned)
        .map(|(_, class)| *class)
        .unwrap_or(YearClass::Unknown)
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionGroup {
    Gk,
    Def,
    Mid,
    For,
    Unk,
}

impl PositionGroup {
    pub const ALL: [PositionGroup; 5] = [
        PositionGroup::Gk,
        PositionGroup::Def,
        PositionGroup::Mid,
        PositionGroup::For,
        PositionGroup::Unk,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PositionGroup::Gk => "GK",
            PositionGroup::Def => "DEF",
            PositionGroup::Mid => "MID",
            PositionGroup::For => "FOR",
            PositionGroup::Unk => "UNK",
        }
    }

    fn index(self) -> usize {
        match self {
            PositionGroup::Gk => 0,
            PositionGroup::Def => 1,
            PositionGroup::Mid => 2,
            PositionGroup::For => 3,
            PositionGroup::Unk => 4,
        }
    }
}

impl fmt::Display for PositionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Predicate applied to the primary position token.
#[derive(Debug, Clone, Copy)]
enum TokenMatch {
    Exact(&'static str),
    Contains(&'static str),
}

impl TokenMatch {
    fn matches(self, token: &str) -> bool {
        match self {
            TokenMatch::Exact(s) => token == s,
            TokenMatch::Contains(s) => token.contains(s),
        }
    }
}

/// Classification rules, evaluated top to bottom; the first hit wins.
///
/// Short defender codes ("D", "CD", "DF", "LD", "RD") and "M" are exact
/// matches only, otherwise "CDM" would land in DEF through the "D" it
/// contains. "DF" must also resolve before the catch-all "F".
const POSITION_RULES: &[(TokenMatch, PositionGroup)] = &[
    (TokenMatch::Contains("GK"), PositionGroup::Gk),
    (TokenMatch::Contains("GOAL"), PositionGroup::Gk),
    (TokenMatch::Contains("KEEP"), PositionGroup::Gk),
    (TokenMatch::Exact("G"), PositionGroup::Gk),
    (TokenMatch::Exact("D"), PositionGroup::Def),
    (TokenMatch::Exact("CD"), PositionGroup::Def),
    (TokenMatch::Exact("DF"), PositionGroup::Def),
    (TokenMatch::Exact("LD"), PositionGroup::Def),
    (TokenMatch::Exact("RD"), PositionGroup::Def),
    (TokenMatch::Contains("CB"), PositionGroup::Def),
    (TokenMatch::Contains("LB"), PositionGroup::Def),
    (TokenMatch::Contains("RB"), PositionGroup::Def),
    (TokenMatch::Contains("FB"), PositionGroup::Def),
    (TokenMatch::Contains("WB"), PositionGroup::Def),
    (TokenMatch::Contains("DEF"), PositionGroup::Def),
    (TokenMatch::Contains("BACK"), PositionGroup::Def),
    (TokenMatch::Contains("SW"), PositionGroup::Def),
    (TokenMatch::Exact("M"), PositionGroup::Mid),
    (TokenMatch::Contains("CM"), PositionGroup::Mid),
    (TokenMatch::Contains("DM"), PositionGroup::Mid),
    (TokenMatch::Contains("AM"), PositionGroup::Mid),
    (TokenMatch::Contains("LM"), PositionGroup::Mid),
    (TokenMatch::Contains("RM"), PositionGroup::Mid),
    (TokenMatch::Contains("MF"), PositionGroup::Mid),
    (TokenMatch::Contains("MID"), PositionGroup::Mid),
    (TokenMatch::Contains("ST"), PositionGroup::For),
    (TokenMatch::Contains("FW"), PositionGroup::For),
    (TokenMatch::Contains("FOR"), PositionGroup::For),
    (TokenMatch::Contains("ATT"), PositionGroup::For),
    (TokenMatch::Contains("CF"), PositionGroup::For),
    (TokenMatch::Contains("W"), PositionGroup::For),
    (TokenMatch::Contains("F"), PositionGroup::For),
];

pub const UNK: &str = "UNK";

/// A resolved position: the fine-grained zone code and its broad group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    pub zone: String,
    pub group: PositionGroup,
}

impl Position {
    pub fn unknown() -> Self {
        Position {
            zone: UNK.to_string(),
            group: PositionGroup::Unk,
        }
    }
}

/// Resolve a listed position such as "CDM/CB" or "d " into (zone, group).
///
/// Only letters and '/' survive; the token before the first slash is the
/// primary position.
pub fn normalize_position(raw: &str) -> Position {
    let letters: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || *c == '/')
        .collect::<String>()
        .to_ascii_uppercase();
    let primary = letters.split('/').next().unwrap_or_default();
    if primary.is_empty() {
        return Position::unknown();
    }

    let group = POSITION_RULES
        .iter()
        .find(|(rule, _)| rule.matches(primary))
        .map(|(_, group)| *group)
        .unwrap_or(PositionGroup::Unk);

    Position {
        zone: primary.to_string(),
        group,
    }
}

// ---------------------------------------------------------------------------
// Canonical records
// ---------------------------------------------------------------------------

/// A player event row after every text field has been canonicalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPlayerRecord {
    pub season: String,
    pub match_id: String,
    pub date: String,
    pub team: String,
    pub player: String,
    pub position_zone: String,
    pub position_group: PositionGroup,
    pub year_ordinal: u8,
    pub year_label: YearClass,
    pub goals: f64,
    pub shots: f64,
    pub sog: f64,
    pub assists: f64,
}

/// A fixture with canonical identifiers, ready to join against team rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    pub match_id: String,
    pub season: String,
    pub date: NaiveDate,
    pub home_team: String,
    pub away_team: String,
    pub home_goals: Option<u32>,
    pub away_goals: Option<u32>,
}

impl Fixture {
    pub fn involves(&self, team: &str) -> bool {
        self.home_team == team || self.away_team == team
    }
}

/// Position and year resolved for a (season, team, player).
#[derive(Debug, Clone)]
struct PlayerProfile {
    position: Position,
    year: YearClass,
}

type PlayerKey = (String, String, String);

/// Normalize player events, applying one profile per (season, team, player).
///
/// Profiles are last-seen-wins: later event rows override earlier ones, and
/// roster rows (read after events) override both. Repeated lines for the same
/// (match, team, player) collapse to the last copy.
pub fn normalize_events(
    events: &[RawEventRecord],
    rosters: &[RosterRecord],
) -> Vec<CanonicalPlayerRecord> {
    let mut profiles: HashMap<PlayerKey, PlayerProfile> = HashMap::new();
    let mut canonical: Vec<CanonicalPlayerRecord> = Vec::with_capacity(events.len());
    let mut slot_by_line: HashMap<(String, String, String), usize> = HashMap::new();
    let mut duplicates = 0usize;

    for event in events {
        let season = canonical_text(&event.season);
        let team = canonical_text(&event.team);
        let player = canonical_text(&event.player);
        let match_id = canonical_text(&event.match_id);

        profiles.insert(
            (season.clone(), team.clone(), player.clone()),
            PlayerProfile {
                position: normalize_position(&event.position),
                year: normalize_year(&event.academic_year),
            },
        );

        let record = CanonicalPlayerRecord {
            season,
            match_id: match_id.clone(),
            date: event.date.trim().to_string(),
            team: team.clone(),
            player: player.clone(),
            position_zone: UNK.to_string(),
            position_group: PositionGroup::Unk,
            year_ordinal: 0,
            year_label: YearClass::Unknown,
            goals: event.goals,
            shots: event.shots,
            sog: event.shots_on_goal,
            assists: event.assists,
        };

        match slot_by_line.get(&(match_id.clone(), team.clone(), player.clone())) {
            Some(&slot) => {
                canonical[slot] = record;
                duplicates += 1;
            }
            None => {
                slot_by_line.insert((match_id, team, player), canonical.len());
                canonical.push(record);
            }
        }
    }

    for roster in rosters {
        profiles.insert(
            (
                canonical_text(&roster.season),
                canonical_text(&roster.team),
                canonical_text(&roster.player),
            ),
            PlayerProfile {
                position: normalize_position(&roster.position),
                year: normalize_year(&roster.academic_year),
            },
        );
    }

    let mut unk_positions = 0usize;
    let mut unk_years = 0usize;
    for record in &mut canonical {
        let key = (
            record.season.clone(),
            record.team.clone(),
            record.player.clone(),
        );
        if let Some(profile) = profiles.get(&key) {
            record.position_zone = profile.position.zone.clone();
            record.position_group = profile.position.group;
            record.year_ordinal = profile.year.ordinal();
            record.year_label = profile.year;
        }
        if record.position_group == PositionGroup::Unk {
            unk_positions += 1;
        }
        if record.year_label == YearClass::Unknown {
            unk_years += 1;
        }
    }

    if duplicates > 0 {
        debug!("collapsed {} repeated player lines (last copy kept)", duplicates);
    }
    info!(
        "normalized {} player rows ({} UNK positions, {} UNK years)",
        canonical.len(),
        unk_positions,
        unk_years
    );
    canonical
}

/// Canonicalize fixture identifiers so they join against normalized events.
pub fn normalize_fixtures(fixtures: &[FixtureRecord]) -> Vec<Fixture> {
    fixtures
        .iter()
        .map(|f| Fixture {
            match_id: canonical_text(&f.match_id),
            season: canonical_text(&f.season),
            date: f.date,
            home_team: canonical_text(&f.home_team),
            away_team: canonical_text(&f.away_team),
            home_goals: f.home_goals,
            away_goals: f.away_goals,
        })
        .collect()
}

/// Count players per position group, indexed in `PositionGroup::ALL` order.
pub(crate) fn group_counts<'a, I>(groups: I) -> [usize; 5]
where
    I: IntoIterator<Item = &'a PositionGroup>,
{
    let mut counts = [0usize; 5];
    for group in groups {
        counts[group.index()] += 1;
    }
    counts
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
