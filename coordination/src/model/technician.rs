//! Technician directory records (read-only to this crate).

use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// One working window on a weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingDay {
    pub weekday: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicianProfile {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialization: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    /// Empty means no roster on file; every weekday counts as working.
    #[serde(default)]
    pub working_hours: Vec<WorkingDay>,
    #[serde(default)]
    pub holidays: BTreeSet<NaiveDate>,
    /// Other identifiers this person is known by (legacy user ids, staff numbers).
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl TechnicianProfile {
    pub fn new(tenant_id: impl Into<String>, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            name: name.into(),
            email: None,
            specialization: None,
            skills: Vec::new(),
            working_hours: Vec::new(),
            holidays: BTreeSet::new(),
            aliases: Vec::new(),
            active: true,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_specialization(mut self, specialization: impl Into<String>) -> Self {
        self.specialization = Some(specialization.into());
        self
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_day(mut self, weekday: Weekday, start: NaiveTime, end: NaiveTime) -> Self {
        self.working_hours.push(WorkingDay {
            weekday,
            start,
            end,
        });
        self
    }

    pub fn with_holiday(mut self, date: NaiveDate) -> Self {
        self.holidays.insert(date);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn works_on(&self, weekday: Weekday) -> bool {
        self.working_hours.is_empty() || self.working_hours.iter().any(|d| d.weekday == weekday)
    }

    /// Rostered window on `weekday`, if the roster lists one.
    pub fn hours_on(&self, weekday: Weekday) -> Option<(NaiveTime, NaiveTime)> {
        self.working_hours
            .iter()
            .find(|d| d.weekday == weekday)
            .map(|d| (d.start, d.end))
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }

    /// Case-insensitive match between the specialization and a request topic.
    ///
    /// Either text containing the other counts ("Printers" matches
    /// "printer"). Blank values never match.
    pub fn specialization_matches(&self, topic: &str) -> bool {
        let Some(spec) = self.specialization.as_deref() else {
            return false;
        };
        let spec = spec.trim().to_lowercase();
        let topic = topic.trim().to_lowercase();
        if spec.is_empty() || topic.is_empty() {
            return false;
        }
        spec.contains(&topic) || topic.contains(&spec)
    }

    /// Every identifier this profile answers to: id, email, aliases.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str())
            .chain(self.email.as_deref())
            .chain(self.aliases.iter().map(String::as_str))
    }
}

/// Directory lookup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TechnicianRef {
    Id(String),
    Email(String),
}

impl TechnicianRef {
    /// Anything containing `@` is treated as an email.
    pub fn parse(value: &str) -> Self {
        if value.contains('@') {
            Self::Email(value.to_string())
        } else {
            Self::Id(value.to_string())
        }
    }
}

/// Filter for directory listings.
#[derive(Debug, Clone, Default)]
pub struct TechnicianFilter {
    pub specialization: Option<String>,
    pub include_inactive: bool,
}

impl TechnicianFilter {
    pub fn active() -> Self {
        Self::default()
    }

    pub fn matches(&self, profile: &TechnicianProfile) -> bool {
        if !self.include_inactive && !profile.active {
            return false;
        }
        match &self.specialization {
            Some(spec) => profile.specialization_matches(spec),
            None => true,
        }
    }
}
