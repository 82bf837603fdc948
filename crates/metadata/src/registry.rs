//! The factual query registry: an ordered list of regex + handler rules that
//! resolve a query entirely from laureate metadata. The matcher is a single
//! scan in declaration order; the first pattern that matches wins. Handlers
//! are pure and never fail; a miss is simply `None` from the registry.

use regex::{Captures, Regex};
use serde::Serialize;

use crate::{Gender, Laureate};

/// What a matched rule produced: the user-facing answer plus, when one
/// laureate is the subject of the answer, a reference to that record so the
/// response can carry structured fields alongside the string.
struct RuleHit<'a> {
    answer: String,
    subject: Option<&'a Laureate>,
}

impl<'a> RuleHit<'a> {
    fn text(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            subject: None,
        }
    }

    fn about(answer: impl Into<String>, subject: &'a Laureate) -> Self {
        Self {
            answer: answer.into(),
            subject: Some(subject),
        }
    }
}

type Handler = for<'a> fn(&Captures<'_>, &'a [Laureate]) -> RuleHit<'a>;

pub struct FactualRule {
    pub name: &'static str,
    pattern: Regex,
    handler: Handler,
}

/// A metadata answer, enriched with the structured fields of the laureate the
/// answer is about (when there is exactly one).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetadataAnswer {
    pub answer: String,
    pub rule_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub laureate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year_awarded: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prize_motivation: Option<String>,
}

pub struct FactualRegistry {
    rules: Vec<FactualRule>,
}

impl Default for FactualRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FactualRegistry {
    pub fn new() -> Self {
        let rule = |name: &'static str, pattern: &str, handler: Handler| FactualRule {
            name,
            pattern: Regex::new(pattern).expect("static rule pattern compiles"),
            handler,
        };

        // Declaration order is load-bearing: the gender rule must precede the
        // country rule so "first female laureate" is not parsed as a country.
        let rules = vec![
            rule(
                "award_year_by_name",
                r"(?i)(?:what year|when) did (.+?) win",
                handle_award_year,
            ),
            rule(
                "count_women_since_year",
                r"(?i)how many women (?:have )?won since (\d{4})",
                handle_count_women_since,
            ),
            rule(
                "winner_in_year",
                r"(?i)who won (?:the )?nobel (?:prize )?(?:in literature )?in (\d{4})",
                handle_winner_in_year,
            ),
            rule(
                "most_awarded_country",
                r"(?i)which country has (?:won|received) the most",
                handle_most_awarded_country,
            ),
            rule(
                "country_of_laureate",
                r"(?i)what country is ([\w .'’-]+?) from",
                handle_country_of_laureate,
            ),
            rule(
                "first_last_gender_laureate",
                r"(?i)who was the (first|last) (male|female|woman|man) (?:winner|laureate)",
                handle_first_last_gender,
            ),
            rule(
                "count_laureates_from_country",
                r"(?i)how many (?:laureates|winners)(?: are| were)? from ([\w .'-]+)",
                handle_count_from_country,
            ),
            rule(
                "prize_motivation_by_name",
                r"(?i)what (?:was|is) the (?:prize )?motivation for ([\w .'’-]+)",
                handle_prize_motivation,
            ),
            rule(
                "birth_death_date_by_name",
                r"(?i)when was ([\w .'’-]+?) (born|died)",
                handle_birth_death_date,
            ),
            rule(
                "years_with_no_award",
                r"(?i)(?:which|what)? ?years (?:was|were)? ?(?:the )?nobel prize in literature (?:not awarded|no award)",
                handle_years_with_no_award,
            ),
            rule(
                "first_last_country_laureate",
                r"(?i)who was the (first|last) ([\w .'-]+?) laureate",
                handle_first_last_country,
            ),
        ];

        Self { rules }
    }

    pub fn rules(&self) -> &[FactualRule] {
        &self.rules
    }

    /// Scan the registry in order; on the first pattern match invoke the
    /// handler and wrap its output. Returns `None` when no rule matches, in
    /// which case the caller falls through to retrieval.
    pub fn answer(&self, query: &str, laureates: &[Laureate]) -> Option<MetadataAnswer> {
        for rule in &self.rules {
            if let Some(captures) = rule.pattern.captures(query) {
                let hit = (rule.handler)(&captures, laureates);
                tracing::debug!(rule = rule.name, "factual rule matched");
                return Some(MetadataAnswer {
                    answer: hit.answer,
                    rule_name: rule.name.to_string(),
                    laureate: hit.subject.map(|l| l.full_name.clone()),
                    year_awarded: hit.subject.map(|l| l.year_awarded),
                    country: hit.subject.map(|l| l.country.clone()),
                    category: hit.subject.map(|l| l.category.clone()),
                    prize_motivation: hit.subject.map(|l| l.prize_motivation.clone()),
                });
            }
        }
        None
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

fn find_by_name<'a>(name: &str, laureates: &'a [Laureate]) -> Option<&'a Laureate> {
    let needle = name.trim().to_lowercase();
    laureates
        .iter()
        .find(|l| l.full_name.to_lowercase().contains(&needle))
}

/// Earliest laureate of a filtered set: year ascending, name ascending on ties.
fn first_of<'a>(items: &[&'a Laureate]) -> Option<&'a Laureate> {
    items
        .iter()
        .copied()
        .min_by(|a, b| {
            (a.year_awarded, &a.full_name).cmp(&(b.year_awarded, &b.full_name))
        })
}

/// Latest laureate of a filtered set: year descending, name ascending on ties.
fn last_of<'a>(items: &[&'a Laureate]) -> Option<&'a Laureate> {
    let max_year = items.iter().map(|l| l.year_awarded).max()?;
    items
        .iter()
        .copied()
        .filter(|l| l.year_awarded == max_year)
        .min_by(|a, b| a.full_name.cmp(&b.full_name))
}

fn handle_award_year<'a>(captures: &Captures<'_>, laureates: &'a [Laureate]) -> RuleHit<'a> {
    let name = captures.get(1).map_or("", |m| m.as_str());
    match find_by_name(name, laureates) {
        Some(laureate) => RuleHit::about(
            format!("{} won in {}.", laureate.full_name, laureate.year_awarded),
            laureate,
        ),
        None => RuleHit::text(format!("No laureate found matching '{}'.", name.trim())),
    }
}

fn handle_count_women_since<'a>(captures: &Captures<'_>, laureates: &'a [Laureate]) -> RuleHit<'a> {
    let since: u32 = captures
        .get(1)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    let count = laureates
        .iter()
        .filter(|l| l.gender == Gender::Female && l.year_awarded >= since)
        .count();
    RuleHit::text(format!(
        "{count} women have won the Nobel Prize in Literature since {since}."
    ))
}

fn handle_winner_in_year<'a>(captures: &Captures<'_>, laureates: &'a [Laureate]) -> RuleHit<'a> {
    let year: u32 = captures
        .get(1)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    let winners: Vec<&Laureate> = laureates.iter().filter(|l| l.year_awarded == year).collect();
    match winners.as_slice() {
        [] => RuleHit::text(format!("No winners found for the year {year}.")),
        [only] => RuleHit::about(format!("The winner was: {}.", only.full_name), only),
        many => {
            let mut names: Vec<&str> = many.iter().map(|l| l.full_name.as_str()).collect();
            names.sort();
            RuleHit::text(format!("The winners were: {}.", names.join(", ")))
        }
    }
}

fn handle_most_awarded_country<'a>(_: &Captures<'_>, laureates: &'a [Laureate]) -> RuleHit<'a> {
    let mut counts: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
    for laureate in laureates {
        if !laureate.country.is_empty() {
            *counts.entry(laureate.country.as_str()).or_insert(0) += 1;
        }
    }
    // BTreeMap iteration is name-ascending, so max_by on the count alone
    // keeps the alphabetically-first country when counts tie.
    match counts.iter().max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0))) {
        Some((country, count)) => RuleHit::text(format!(
            "{country} has the most Nobel Prize in Literature winners with {count}."
        )),
        None => RuleHit::text("Could not determine the most awarded country."),
    }
}

fn handle_country_of_laureate<'a>(captures: &Captures<'_>, laureates: &'a [Laureate]) -> RuleHit<'a> {
    let name = captures.get(1).map_or("", |m| m.as_str());
    match find_by_name(name, laureates) {
        Some(laureate) => RuleHit::about(
            format!("{} is from {}.", laureate.full_name, laureate.country),
            laureate,
        ),
        None => RuleHit::text(format!("No laureate found matching '{}'.", name.trim())),
    }
}

fn handle_first_last_gender<'a>(captures: &Captures<'_>, laureates: &'a [Laureate]) -> RuleHit<'a> {
    let order = captures.get(1).map_or("first", |m| m.as_str()).to_lowercase();
    let gender = match captures
        .get(2)
        .map_or("", |m| m.as_str())
        .to_lowercase()
        .as_str()
    {
        "woman" | "female" => Gender::Female,
        _ => Gender::Male,
    };
    let filtered: Vec<&Laureate> = laureates.iter().filter(|l| l.gender == gender).collect();
    let gender_word = match gender {
        Gender::Female => "female",
        _ => "male",
    };
    let pick = if order == "first" {
        first_of(&filtered)
    } else {
        last_of(&filtered)
    };
    match pick {
        Some(laureate) => RuleHit::about(
            format!(
                "The {order} {gender_word} laureate was {} in {}.",
                laureate.full_name, laureate.year_awarded
            ),
            laureate,
        ),
        None => RuleHit::text(format!("No {gender_word} laureates found.")),
    }
}

fn handle_count_from_country<'a>(captures: &Captures<'_>, laureates: &'a [Laureate]) -> RuleHit<'a> {
    let wanted = captures.get(1).map_or("", |m| m.as_str()).trim().to_lowercase();
    let mut canonical: Option<&str> = None;
    let count = laureates
        .iter()
        .filter(|l| l.country.to_lowercase() == wanted)
        .inspect(|l| canonical = Some(l.country.as_str()))
        .count();
    let display = canonical.map_or_else(|| title_case(&wanted), str::to_string);
    RuleHit::text(format!("{count} laureates are from {display}."))
}

fn handle_prize_motivation<'a>(captures: &Captures<'_>, laureates: &'a [Laureate]) -> RuleHit<'a> {
    let name = captures.get(1).map_or("", |m| m.as_str());
    match find_by_name(name, laureates) {
        Some(laureate) => RuleHit::about(
            format!(
                "The prize motivation for {} was: {}",
                laureate.full_name, laureate.prize_motivation
            ),
            laureate,
        ),
        None => RuleHit::text(format!("No laureate found matching '{}'.", name.trim())),
    }
}

fn handle_birth_death_date<'a>(captures: &Captures<'_>, laureates: &'a [Laureate]) -> RuleHit<'a> {
    let name = captures.get(1).map_or("", |m| m.as_str());
    let event = captures.get(2).map_or("born", |m| m.as_str()).to_lowercase();
    let Some(laureate) = find_by_name(name, laureates) else {
        return RuleHit::text(format!("No laureate found matching '{}'.", name.trim()));
    };
    let answer = if event == "born" {
        format!("{} was born on {}.", laureate.full_name, laureate.date_of_birth)
    } else {
        match &laureate.date_of_death {
            Some(date) => format!("{} died on {}.", laureate.full_name, date),
            None => format!("{} has no recorded date of death.", laureate.full_name),
        }
    };
    RuleHit::about(answer, laureate)
}

fn handle_years_with_no_award<'a>(_: &Captures<'_>, laureates: &'a [Laureate]) -> RuleHit<'a> {
    let awarded: std::collections::BTreeSet<u32> =
        laureates.iter().map(|l| l.year_awarded).collect();
    let (Some(&min), Some(&max)) = (awarded.first(), awarded.last()) else {
        return RuleHit::text("No data available.");
    };
    let missing: Vec<String> = (min..=max)
        .filter(|year| !awarded.contains(year))
        .map(|year| year.to_string())
        .collect();
    if missing.is_empty() {
        return RuleHit::text("Every year in the dataset has at least one laureate.");
    }
    RuleHit::text(format!(
        "The Nobel Prize in Literature was not awarded in the following years: {}.",
        missing.join(", ")
    ))
}

fn handle_first_last_country<'a>(captures: &Captures<'_>, laureates: &'a [Laureate]) -> RuleHit<'a> {
    let order = captures.get(1).map_or("first", |m| m.as_str()).to_lowercase();
    let wanted = captures.get(2).map_or("", |m| m.as_str()).trim().to_lowercase();
    let filtered: Vec<&Laureate> = laureates
        .iter()
        .filter(|l| l.country.to_lowercase() == wanted)
        .collect();
    if filtered.is_empty() {
        return RuleHit::text(format!("No laureates found from {}.", title_case(&wanted)));
    }
    let pick = if order == "first" {
        first_of(&filtered)
    } else {
        last_of(&filtered)
    };
    match pick {
        Some(laureate) => RuleHit::about(
            format!(
                "The {order} laureate from {} was {} in {}.",
                laureate.country, laureate.full_name, laureate.year_awarded
            ),
            laureate,
        ),
        None => RuleHit::text(format!("No laureates found from {}.", title_case(&wanted))),
    }
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
