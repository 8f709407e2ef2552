//! Built-in string formats

use std::net::IpAddr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::dialect::parse_datetime;

static EMAIL: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9._%+-]*[a-zA-Z0-9])?@[a-zA-Z0-9]([a-zA-Z0-9.-]*[a-zA-Z0-9])?\.[a-zA-Z]{2,}$").ok()
});
static URL: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^https?://[^\s/$.?#][^\s]*$").ok());
static SLUG: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Email,
    Url,
    Uuid,
    Alpha,
    Alphanumeric,
    Numeric,
    Slug,
    Hex,
    Ip,
    Date,
}

impl Format {
    pub fn matches(&self, input: &str) -> bool {
        match self {
            Format::Email => regex_matches(&EMAIL, input),
            Format::Url => regex_matches(&URL, input),
            Format::Slug => regex_matches(&SLUG, input),
            Format::Uuid => uuid::Uuid::parse_str(input).is_ok(),
            Format::Alpha => !input.is_empty() && input.chars().all(char::is_alphabetic),
            Format::Alphanumeric => !input.is_empty() && input.chars().all(char::is_alphanumeric),
            Format::Numeric => input.trim().parse::<f64>().is_ok(),
            Format::Hex => !input.is_empty() && input.chars().all(|c| c.is_ascii_hexdigit()),
            Format::Ip => input.parse::<IpAddr>().is_ok(),
            Format::Date => parse_datetime(input).is_some(),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Format::Email => "a valid email address",
            Format::Url => "a valid URL",
            Format::Uuid => "a valid UUID",
            Format::Alpha => "alphabetic",
            Format::Alphanumeric => "alphanumeric",
            Format::Numeric => "numeric",
            Format::Slug => "a valid slug",
            Format::Hex => "hexadecimal",
            Format::Ip => "a valid IP address",
            Format::Date => "a valid date",
        }
    }
}

fn regex_matches(pattern: &Lazy<Option<Regex>>, input: &str) -> bool {
    pattern.as_ref().map(|re| re.is_match(input)).unwrap_or(false)
}
