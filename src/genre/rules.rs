//! Ordered keyword rules that map free text to a genre bucket.
//!
//! Rules are evaluated top to bottom and the first match wins. Specific
//! genres come before the broad ones they would otherwise be shadowed by:
//! Phonk before Hip-Hop, Reggaeton before Reggae, Drill and Trap before
//! Hip-Hop, and Pop last of all.

use std::sync::OnceLock;

use regex_lite::{Regex, RegexBuilder};

use crate::error::Result;

/// `(genre, pattern)` pairs in evaluation order. Patterns are matched case
/// insensitively.
const RULES: &[(&str, &str)] = &[
    ("Phonk", r"phonk"),
    ("K-Pop", r"\bk-?pop\b|\bkpop"),
    ("J-Pop", r"\bj-?pop\b|\banime\b|vocaloid|\bj-?rock\b"),
    ("Lo-Fi", r"\blo-?fi\b|chillhop|\bchill ?beats\b"),
    ("Drum & Bass", r"drum ?(and|&|n|'n') ?bass|\bdnb\b|\bd&b\b|\bjungle\b|liquid funk"),
    ("Dubstep", r"dubstep|\briddim\b|brostep"),
    ("House", r"\bhouse\b|\btech-?house\b"),
    ("Techno", r"techno|\bhard ?style\b"),
    ("Trance", r"\btrance\b|\bpsytrance\b"),
    ("Electronic", r"\bedm\b|electro|synthwave|\bsynth-?pop\b|\bdance\b|\brave\b"),
    ("Drill", r"\bdrill\b"),
    ("Trap", r"\btrap\b"),
    ("Hip-Hop", r"hip[- ]?hop|\brap\b|\brapper\b|\bmc\b|\blil\b|\bboom ?bap\b"),
    ("R&B", r"r&b|\brnb\b|r'n'b|\bsoul\b|neo-soul|\bfunk\b"),
    ("Reggaeton", r"reggaeton|\bperreo\b|\bdembow\b"),
    ("Reggae", r"reggae|dancehall|\bska\b|\bdub\b"),
    ("Latin", r"\blatin|\bsalsa\b|bachata|cumbia|merengue|bossa ?nova|\bcorridos?\b"),
    ("Afrobeats", r"\bafro|amapiano"),
    ("Metal", r"metal|deathcore|\bdjent\b|\bthrash\b"),
    ("Punk", r"\bpunk|\bemo\b|\bhardcore\b|\bgrunge\b"),
    ("Rock", r"\brock\b|\bclassic rock\b|\bhard rock\b|\bprog\b"),
    ("Indie", r"\bindie\b|alternative|shoegaze|dream ?pop"),
    ("Jazz", r"\bjazz|\bbebop\b|\bswing\b"),
    ("Blues", r"\bblues\b"),
    ("Classical", r"classical|symphon|sonata|concerto|orchestra|\bopera\b|\bbaroque\b"),
    ("Country", r"\bcountry\b|bluegrass|americana"),
    ("Folk", r"\bfolk\b|singer-songwriter|\bacoustic\b"),
    ("Soundtrack", r"soundtrack|\bost\b|\bscore\b|\bfilm\b"),
    ("Gospel", r"gospel|\bworship\b|\bchristian\b"),
    ("Pop", r"\bpop\b|\bpop-|top 40|\bchart"),
];

/// Compiled rule table.
pub struct Rules {
    rules: Vec<(&'static str, Regex)>,
}

impl Rules {
    /// Compiles the built-in rule table.
    pub fn new() -> Result<Self> {
        let rules = RULES
            .iter()
            .map(|&(genre, pattern)| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|regex| (genre, regex))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// The genre of the first rule matching `text`.
    #[must_use]
    pub fn classify(&self, text: &str) -> Option<&'static str> {
        self.rules
            .iter()
            .find(|(_, regex)| regex.is_match(text))
            .map(|&(genre, _)| genre)
    }

    /// Genres in evaluation order.
    pub fn genres(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(|&(genre, _)| genre)
    }
}

/// The built-in rule table, compiled once.
pub fn rules() -> Result<&'static Rules> {
    static RULES_CELL: OnceLock<Rules> = OnceLock::new();
    if let Some(rules) = RULES_CELL.get() {
        return Ok(rules);
    }
    let rules = Rules::new()?;
    Ok(RULES_CELL.get_or_init(|| rules))
}

/// Classifies free text against the built-in rule table.
#[must_use]
pub fn classify_text(text: &str) -> Option<&'static str> {
    match rules() {
        Ok(rules) => rules.classify(text),
        Err(e) => {
            error!("genre rules failed to compile: {e}");
            None
        }
    }
}
