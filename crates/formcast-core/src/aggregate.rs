// Match aggregation: player rows -> one summary row per (match, team).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::normalize::{group_counts, CanonicalPlayerRecord, Fixture};

// ---------------------------------------------------------------------------
// Match result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchResult {
    Win,
    Draw,
    Loss,
}

impl MatchResult {
    /// Derive the result from the row's own goals and the opponent's goals.
    pub fn from_goals(own: u32, opponent: u32) -> Self {
        match own.cmp(&opponent) {
            std::cmp::Ordering::Greater => MatchResult::Win,
            std::cmp::Ordering::Less => MatchResult::Loss,
            std::cmp::Ordering::Equal => MatchResult::Draw,
        }
    }

    /// Points-style encoding used by the win-rate form feature.
    pub fn score(self) -> f64 {
        match self {
            MatchResult::Win => 1.0,
            MatchResult::Draw => 0.5,
            MatchResult::Loss => 0.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MatchResult::Win => "win",
            MatchResult::Draw => "draw",
            MatchResult::Loss => "loss",
        }
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Stat: the numeric columns of a team-match row
// ---------------------------------------------------------------------------

/// Named numeric column of a `TeamMatchRow`. The string form is the column
/// header in every stage table and the name used in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stat {
    Goals,
    Shots,
    ShotsOnGoal,
    Assists,
    PlayerCount,
    AvgPlayerYear,
    GoalsMean,
    ShotsMean,
    SogMean,
    AssistsMean,
    GoalsMax,
    ShareGk,
    ShareDef,
    ShareMid,
    ShareFor,
    ShareUnk,
    IsHome,
}

impl Stat {
    pub const ALL: [Stat; 17] = [
        Stat::Goals,
        Stat::Shots,
        Stat::ShotsOnGoal,
        Stat::Assists,
        Stat::PlayerCount,
        Stat::AvgPlayerYear,
        Stat::GoalsMean,
        Stat::ShotsMean,
        Stat::SogMean,
        Stat::AssistsMean,
        Stat::GoalsMax,
        Stat::ShareGk,
        Stat::ShareDef,
        Stat::ShareMid,
        Stat::ShareFor,
        Stat::ShareUnk,
        Stat::IsHome,
    ];

    pub fn column(self) -> &'static str {
        match self {
            Stat::Goals => "goals",
            Stat::Shots => "shots",
            Stat::ShotsOnGoal => "sog",
            Stat::Assists => "assists",
            Stat::PlayerCount => "player_count",
            Stat::AvgPlayerYear => "avg_player_year",
            Stat::GoalsMean => "goals_mean",
            Stat::ShotsMean => "shots_mean",
            Stat::SogMean => "sog_mean",
            Stat::AssistsMean => "assists_mean",
            Stat::GoalsMax => "goals_max",
            Stat::ShareGk => "gk",
            Stat::ShareDef => "def",
            Stat::ShareMid => "mid",
            Stat::ShareFor => "for",
            Stat::ShareUnk => "unk",
            Stat::IsHome => "is_home",
        }
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for Stat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stat::ALL
            .iter()
            .copied()
            .find(|stat| stat.column() == s)
            .ok_or_else(|| format!("unknown statistic '{s}'"))
    }
}

impl<'de> Deserialize<'de> for Stat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Config files may spell stats loosely; table columns never do.
        let raw = String::deserialize(deserializer)?;
        raw.trim()
            .to_lowercase()
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Team-match row
// ---------------------------------------------------------------------------

/// One team's aggregated line for one match.
///
/// Position shares sum to 1.0 whenever `player_count > 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMatchRow {
    pub match_id: String,
    pub season: String,
    pub date: NaiveDate,
    pub team: String,
    pub opponent: String,
    pub is_home: u8,
    pub result: Option<MatchResult>,
    pub goals: f64,
    pub shots: f64,
    pub sog: f64,
    pub assists: f64,
    pub player_count: u32,
    pub avg_player_year: f64,
    pub goals_mean: f64,
    pub shots_mean: f64,
    pub sog_mean: f64,
    pub assists_mean: f64,
    pub goals_max: f64,
    pub gk: f64,
    pub def: f64,
    pub mid: f64,
    #[serde(rename = "for")]
    pub fwd: f64,
    pub unk: f64,
}

/// Header of a serialized `TeamMatchRow`, in field order.
pub const TEAM_MATCH_COLUMNS: &[&str] = &[
    "match_id",
    "season",
    "date",
    "team",
    "opponent",
    "is_home",
    "result",
    "goals",
    "shots",
    "sog",
    "assists",
    "player_count",
    "avg_player_year",
    "goals_mean",
    "shots_mean",
    "sog_mean",
    "assists_mean",
    "goals_max",
    "gk",
    "def",
    "mid",
    "for",
    "unk",
];

impl TeamMatchRow {
    pub fn stat(&self, stat: Stat) -> f64 {
        match stat {
            Stat::Goals => self.goals,
            Stat::Shots => self.shots,
            Stat::ShotsOnGoal => self.sog,
            Stat::Assists => self.assists,
            Stat::PlayerCount => f64::from(self.player_count),
            Stat::AvgPlayerYear => self.avg_player_year,
            Stat::GoalsMean => self.goals_mean,
            Stat::ShotsMean => self.shots_mean,
            Stat::SogMean => self.sog_mean,
            Stat::AssistsMean => self.assists_mean,
            Stat::GoalsMax => self.goals_max,
            Stat::ShareGk => self.gk,
            Stat::ShareDef => self.def,
            Stat::ShareMid => self.mid,
            Stat::ShareFor => self.fwd,
            Stat::ShareUnk => self.unk,
            Stat::IsHome => f64::from(self.is_home),
        }
    }

    /// Look up a numeric column by its header name.
    pub fn column(&self, name: &str) -> Option<f64> {
        name.parse::<Stat>().ok().map(|stat| self.stat(stat))
    }

    pub fn share_total(&self) -> f64 {
        self.gk + self.def + self.mid + self.fwd + self.unk
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Counters describing what the aggregator dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateReport {
    pub team_rows: usize,
    pub unknown_fixture_rows: usize,
    pub foreign_team_rows: usize,
    pub dropped_matches: usize,
}

struct Group<'a> {
    match_id: &'a str,
    team: &'a str,
    players: Vec<&'a CanonicalPlayerRecord>,
}

fn mean(sum: f64, n: usize) -> f64 {
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

fn summarize(group: &Group<'_>, fixture: &Fixture) -> TeamMatchRow {
    let players = &group.players;
    let n = players.len();

    let goals: f64 = players.iter().map(|p| p.goals).sum();
    let shots: f64 = players.iter().map(|p| p.shots).sum();
    let sog: f64 = players.iter().map(|p| p.sog).sum();
    let assists: f64 = players.iter().map(|p| p.assists).sum();
    let year_sum: f64 = players.iter().map(|p| f64::from(p.year_ordinal)).sum();
    let goals_max = players.iter().map(|p| p.goals).fold(0.0_f64, f64::max);

    let counts = group_counts(players.iter().map(|p| &p.position_group));
    let share = |i: usize| if n == 0 { 0.0 } else { counts[i] as f64 / n as f64 };

    let is_home = fixture.home_team == group.team;
    let (opponent, own_goals, opp_goals) = if is_home {
        (&fixture.away_team, fixture.home_goals, fixture.away_goals)
    } else {
        (&fixture.home_team, fixture.away_goals, fixture.home_goals)
    };
    let result = match (own_goals, opp_goals) {
        (Some(own), Some(opp)) => Some(MatchResult::from_goals(own, opp)),
        _ => None,
    };

    TeamMatchRow {
        match_id: group.match_id.to_string(),
        season: fixture.season.clone(),
        date: fixture.date,
        team: group.team.to_string(),
        opponent: opponent.clone(),
        is_home: u8::from(is_home),
        result,
        goals,
        shots,
        sog,
        assists,
        player_count: n as u32,
        avg_player_year: mean(year_sum, n),
        goals_mean: mean(goals, n),
        shots_mean: mean(shots, n),
        sog_mean: mean(sog, n),
        assists_mean: mean(assists, n),
        goals_max,
        gk: share(0),
        def: share(1),
        mid: share(2),
        fwd: share(3),
        unk: share(4),
    }
}

/// Collapse player rows into team-match rows joined against the fixture list.
///
/// Groups whose match is unknown, or whose team is not a participant of that
/// fixture, are dropped. A match that does not end up with exactly its home
/// and away rows is dropped entirely.
pub fn aggregate(
    players: &[CanonicalPlayerRecord],
    fixtures: &[Fixture],
) -> (Vec<TeamMatchRow>, AggregateReport) {
    let mut report = AggregateReport::default();

    let mut fixture_by_id: HashMap<&str, &Fixture> = HashMap::new();
    for fixture in fixtures {
        if fixture_by_id.insert(fixture.match_id.as_str(), fixture).is_some() {
            warn!(
                "duplicate fixture '{}', using the later row",
                fixture.match_id
            );
        }
    }

    // Groups in order of first appearance.
    let mut groups: Vec<Group<'_>> = Vec::new();
    let mut slot: HashMap<(&str, &str), usize> = HashMap::new();
    for player in players {
        let key = (player.match_id.as_str(), player.team.as_str());
        let idx = *slot.entry(key).or_insert_with(|| {
            groups.push(Group {
                match_id: key.0,
                team: key.1,
                players: Vec::new(),
            });
            groups.len() - 1
        });
        groups[idx].players.push(player);
    }

    let mut rows: Vec<TeamMatchRow> = Vec::with_capacity(groups.len());
    for group in &groups {
        let Some(fixture) = fixture_by_id.get(group.match_id) else {
            warn!(
                "dropping {} player rows for '{}' in unknown match '{}'",
                group.players.len(),
                group.team,
                group.match_id
            );
            report.unknown_fixture_rows += group.players.len();
            continue;
        };
        if !fixture.involves(group.team) {
            warn!(
                "dropping {} player rows: team '{}' is not a participant of match '{}'",
                group.players.len(),
                group.team,
                group.match_id
            );
            report.foreign_team_rows += group.players.len();
            continue;
        }
        rows.push(summarize(group, fixture));
    }

    // A match keeps its rows only when both participants resolved.
    let mut sides: BTreeMap<&str, (bool, bool)> = BTreeMap::new();
    for row in &rows {
        let entry = sides.entry(row.match_id.as_str()).or_default();
        if row.is_home == 1 {
            entry.0 = true;
        } else {
            entry.1 = true;
        }
    }
    let incomplete: Vec<String> = sides
        .iter()
        .filter(|(_, (home, away))| !(*home && *away))
        .map(|(id, _)| id.to_string())
        .collect();
    for match_id in &incomplete {
        warn!("dropping match '{}': only one participant resolved", match_id);
    }
    report.dropped_matches = incomplete.len();
    rows.retain(|row| !incomplete.contains(&row.match_id));

    report.team_rows = rows.len();
    info!(
        "aggregated {} team-match rows ({} matches dropped)",
        rows.len(),
        report.dropped_matches
    );
    (rows, report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
