//! Default parser for the upstream `profileView` payload.
//!
//! Accepts either the nested `profileView` document (`profile` plus
//! `*View.elements` collections) or an already flattened profile object, and
//! renders each section as `# HEADING` text blocks.

use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use serde_json::{Map, Value};

use super::{ProfileId, ProfileParser, ProfileRecord, RawData};
use crate::error::{ErrorKind, ErrorRecord};

/// `(flattened key, profileView collection)` pairs.
const COLLECTIONS: &[(&str, &str)] = &[
    ("experience", "positionView"),
    ("education", "educationView"),
    ("projects", "projectView"),
    ("honors", "honorView"),
    ("skills", "skillView"),
    ("languages", "languageView"),
    ("certifications", "certificationView"),
    ("publications", "publicationView"),
    ("volunteer", "volunteerExperienceView"),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct VoyagerProfileParser;

impl VoyagerProfileParser {
    pub fn new() -> Self {
        Self
    }
}

impl ProfileParser for VoyagerProfileParser {
    fn parse_profile(&self, id: &ProfileId, raw: &Bytes) -> Result<ProfileRecord, ErrorRecord> {
        let document: Value = serde_json::from_slice(raw).map_err(|err| {
            ErrorRecord::new(ErrorKind::DataFormat, format!("profile payload is not JSON: {err}"))
        })?;
        let profile = flatten(&document).ok_or_else(|| {
            ErrorRecord::new(ErrorKind::DataFormat, "profile payload is not a JSON object")
        })?;

        let full_name = full_name(&profile)?;
        Ok(ProfileRecord {
            public_id: id.as_str().to_string(),
            summary: summary(&profile, &full_name),
            experience: section(&profile, "experience", "# EXPERIENCES", render_experience),
            education: section(&profile, "education", "# EDUCATION", render_education),
            projects: section(&profile, "projects", "# PROJECTS", |p| {
                render_project(p, &full_name)
            }),
            honors: section(&profile, "honors", "# HONORS", render_honor),
            certifications: section(
                &profile,
                "certifications",
                "# LICENSES AND CERTIFICATIONS",
                render_certification,
            ),
            publications: section(&profile, "publications", "# PUBLICATIONS", |p| {
                render_publication(p, &full_name)
            }),
            volunteer: section(&profile, "volunteer", "# VOLUNTEER", render_volunteer),
            skills: skills(&profile),
            languages: languages(&profile),
            posts: String::new(),
            profile_urn: urn(&profile, "profile_urn", "entityUrn"),
            member_urn: urn(&profile, "member_urn", "objectUrn"),
            full_name,
            raw: RawData {
                profile: document,
                posts: None,
            },
        })
    }

    fn attach_posts(&self, record: &mut ProfileRecord, raw: &Bytes) -> Result<(), ErrorRecord> {
        let document: Value = serde_json::from_slice(raw).map_err(|err| {
            ErrorRecord::new(ErrorKind::DataFormat, format!("posts payload is not JSON: {err}"))
        })?;
        let list = document
            .as_array()
            .or_else(|| document.get("elements").and_then(Value::as_array))
            .ok_or_else(|| {
                ErrorRecord::new(ErrorKind::DataFormat, "posts payload has no element list")
            })?;

        let blocks: Vec<String> = list
            .iter()
            .filter_map(Value::as_object)
            .map(|post| render_post(post, record.member_urn.as_deref()))
            .collect();
        record.posts = if blocks.is_empty() {
            String::new()
        } else {
            format!("# POSTS\n{}", blocks.join("\n"))
                .trim_end()
                .to_string()
        };
        record.raw.posts = Some(document);
        Ok(())
    }
}

/// Reads a flat `key`, falling back to the nested `miniProfile` field.
fn urn(profile: &Map<String, Value>, key: &str, mini_key: &str) -> Option<String> {
    text(profile, key)
        .or_else(|| {
            profile
                .get("miniProfile")
                .and_then(Value::as_object)
                .and_then(|mini| text(mini, mini_key))
        })
        .map(str::to_string)
}

fn flatten(document: &Value) -> Option<Map<String, Value>> {
    let root = document.as_object()?;
    let Some(profile) = root.get("profile").and_then(Value::as_object) else {
        return Some(root.clone());
    };

    let mut flat = profile.clone();
    for (key, view) in COLLECTIONS {
        if let Some(elements) = root
            .get(*view)
            .and_then(|v| v.get("elements"))
            .filter(|v| v.is_array())
        {
            flat.insert((*key).to_string(), elements.clone());
        }
    }
    Some(flat)
}

fn text<'a>(item: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    item.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn full_name(profile: &Map<String, Value>) -> Result<String, ErrorRecord> {
    let first = text(profile, "firstName");
    let last = text(profile, "lastName");
    let (Some(first), Some(last)) = (first, last) else {
        return Err(ErrorRecord::new(
            ErrorKind::DataFormat,
            "profile payload lacks firstName/lastName",
        ));
    };
    Ok(match text(profile, "middleName") {
        Some(middle) => format!("{first} {middle} {last}"),
        None => format!("{first} {last}"),
    })
}

fn summary(profile: &Map<String, Value>, full_name: &str) -> String {
    let mut out = format!("PROFILE OF: {full_name}\n");
    if let Some(headline) = text(profile, "headline").filter(|h| *h != "--") {
        out.push_str(&format!("HEADLINE: {headline}\n"));
    }
    let area = text(profile, "geoLocationName")
        .map(|area| format!("{area}, "))
        .unwrap_or_default();
    let country = text(profile, "geoCountryName").unwrap_or_default();
    out.push_str(&format!("LOCATION: {area}{country}\n"));
    if let Some(about) = text(profile, "summary") {
        out.push_str(&format!("\n# ABOUT\n\"\"\"\n{about}\n\"\"\"\n"));
    }
    out.pop();
    out
}

fn section<F>(profile: &Map<String, Value>, key: &str, heading: &str, render: F) -> String
where
    F: Fn(&Map<String, Value>) -> String,
{
    let items: Vec<String> = profile
        .get(key)
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_object).map(&render).collect())
        .unwrap_or_default();
    if items.is_empty() {
        return String::new();
    }
    format!("{heading}\n{}", items.join("\n"))
        .trim_end()
        .to_string()
}

fn quoted(label: &str, body: &str) -> String {
    format!("{label}:\n\"\"\"\n{body}\n\"\"\"\n")
}

fn status_line(item: &Map<String, Value>) -> &'static str {
    if is_ongoing(item) {
        "[Current]\n"
    } else {
        "[Previous]\n"
    }
}

/// Items without an end date are ongoing; otherwise an item is over once
/// the first day of its end month has passed.
fn is_ongoing(item: &Map<String, Value>) -> bool {
    let Some(end) = item
        .get("timePeriod")
        .and_then(|tp| tp.get("endDate"))
        .and_then(Value::as_object)
    else {
        return true;
    };
    let Some(year) = end.get("year").and_then(Value::as_i64) else {
        return true;
    };
    let month = end.get("month").and_then(Value::as_i64).unwrap_or(12);
    let first_of_month = i32::try_from(year)
        .ok()
        .zip(u32::try_from(month).ok())
        .and_then(|(year, month)| NaiveDate::from_ymd_opt(year, month, 1));
    match first_of_month {
        Some(date) => date > Utc::now().date_naive(),
        None => false,
    }
}

#[derive(Clone, Copy)]
enum Precision {
    Month,
    Day,
}

fn format_date(date: &Value, precision: Precision) -> Option<String> {
    let year = date.get("year").and_then(Value::as_i64)?;
    let month = date.get("month").and_then(Value::as_i64);
    let day = date.get("day").and_then(Value::as_i64);
    Some(match (precision, month, day) {
        (Precision::Day, Some(m), Some(d)) => format!("{year}-{m:02}-{d:02}"),
        (_, Some(m), _) => format!("{year}-{m:02}"),
        _ => year.to_string(),
    })
}

fn duration_line(item: &Map<String, Value>) -> String {
    let Some(period) = item.get("timePeriod").filter(|v| v.is_object()) else {
        return String::new();
    };
    let start = period
        .get("startDate")
        .and_then(|d| format_date(d, Precision::Month))
        .unwrap_or_else(|| "Unknown".into());
    let end = period
        .get("endDate")
        .and_then(|d| format_date(d, Precision::Month))
        .unwrap_or_else(|| "Present".into());
    format!("DURATION: {start} to {end}\n")
}

fn render_experience(item: &Map<String, Value>) -> String {
    let mut out = status_line(item).to_string();
    out.push_str(text(item, "title").unwrap_or("Untitled role"));
    if let Some(company) = text(item, "companyName") {
        out.push_str(&format!(" at {company}"));
    }
    out.push('\n');
    out.push_str(&duration_line(item));
    if let Some(description) = text(item, "description") {
        out.push_str(&quoted("DESCRIPTION", description));
    }
    out
}

fn render_education(item: &Map<String, Value>) -> String {
    let mut out = status_line(item).to_string();
    out.push_str(&format!(
        "INSTITUTION: {}\n",
        text(item, "schoolName").unwrap_or("Unknown")
    ));
    if let Some(degree) = text(item, "degreeName") {
        out.push_str(&format!("DEGREE: {degree}\n"));
    }
    if let Some(field) = text(item, "fieldOfStudy") {
        out.push_str(&format!("FIELD OF STUDY: {field}\n"));
    }
    out.push_str(&duration_line(item));
    if let Some(grade) = text(item, "grade") {
        out.push_str(&format!("GRADE: {grade}\n"));
    }
    if let Some(activities) = text(item, "activities") {
        out.push_str(&quoted("ACTIVITIES AND SOCIETIES", activities));
    }
    if let Some(description) = text(item, "description") {
        out.push_str(&quoted("DESCRIPTION", description));
    }
    out
}

fn others_suffix(item: &Map<String, Value>, key: &str) -> String {
    let count = item
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(1);
    if count > 1 {
        format!(" and {} other(s)", count - 1)
    } else {
        String::new()
    }
}

fn render_project(item: &Map<String, Value>, full_name: &str) -> String {
    let mut out = status_line(item).to_string();
    out.push_str(&format!("NAME: {}\n", text(item, "title").unwrap_or("Untitled")));
    out.push_str(&format!(
        "MEMBERS: {full_name}{}\n",
        others_suffix(item, "members")
    ));
    out.push_str(&duration_line(item));
    if let Some(description) = text(item, "description") {
        out.push_str(&quoted("DESCRIPTION", description));
    }
    out
}

fn render_honor(item: &Map<String, Value>) -> String {
    let mut out = format!("NAME: {}\n", text(item, "title").unwrap_or("Untitled"));
    if let Some(issuer) = text(item, "issuer") {
        out.push_str(&format!("ISSUED BY: {issuer}\n"));
    }
    if let Some(date) = item.get("issueDate").and_then(|d| format_date(d, Precision::Day)) {
        out.push_str(&format!("ISSUE DATE: {date}\n"));
    }
    if let Some(description) = text(item, "description") {
        out.push_str(&quoted("DESCRIPTION", description));
    }
    out
}

fn render_certification(item: &Map<String, Value>) -> String {
    let mut out = format!("NAME: {}\n", text(item, "name").unwrap_or("Untitled"));
    if let Some(authority) = text(item, "authority") {
        out.push_str(&format!("ISSUED BY: {authority}\n"));
    }
    if let Some(date) = item
        .get("timePeriod")
        .and_then(|tp| tp.get("startDate"))
        .and_then(|d| format_date(d, Precision::Day))
    {
        out.push_str(&format!("ISSUE DATE: {date}\n"));
    }
    if let Some(description) = text(item, "description") {
        out.push_str(&quoted("DESCRIPTION", description));
    }
    out
}

fn render_publication(item: &Map<String, Value>, full_name: &str) -> String {
    let mut out = format!("TITLE: {}\n", text(item, "name").unwrap_or("Untitled"));
    if item.get("authors").is_some_and(Value::is_array) {
        out.push_str(&format!(
            "AUTHORS: {full_name}{}\n",
            others_suffix(item, "authors")
        ));
    }
    if let Some(date) = item.get("date").and_then(|d| format_date(d, Precision::Day)) {
        out.push_str(&format!("PUBLICATION DATE: {date}\n"));
    }
    if let Some(description) = text(item, "description") {
        out.push_str(&quoted("DESCRIPTION", description));
    }
    out
}

fn render_volunteer(item: &Map<String, Value>) -> String {
    let mut out = status_line(item).to_string();
    out.push_str(text(item, "role").unwrap_or("Volunteer"));
    if let Some(company) = text(item, "companyName") {
        out.push_str(&format!(" at {company}"));
    }
    out.push('\n');
    if let Some(cause) = text(item, "cause") {
        out.push_str(&format!("CAUSE: {cause}\n"));
    }
    out.push_str(&duration_line(item));
    if let Some(description) = text(item, "description") {
        out.push_str(&quoted("DESCRIPTION", description));
    }
    out
}

fn named_items(profile: &Map<String, Value>, key: &str) -> Vec<(String, Option<String>)> {
    profile
        .get(key)
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_object)
                .filter_map(|item| {
                    let name = text(item, "name")?.to_string();
                    Some((name, text(item, "proficiency").map(str::to_string)))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn skills(profile: &Map<String, Value>) -> String {
    let names: Vec<String> = named_items(profile, "skills")
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    if names.is_empty() {
        return String::new();
    }
    format!("# SKILLS\n{}", names.join(", "))
}

fn languages(profile: &Map<String, Value>) -> String {
    let entries: Vec<String> = named_items(profile, "languages")
        .into_iter()
        .map(|(name, proficiency)| match proficiency {
            Some(level) => format!("{name} ({level})"),
            None => name,
        })
        .collect();
    if entries.is_empty() {
        return String::new();
    }
    format!("# LANGUAGES\n{}", entries.join(", "))
}

/// Original author of a repost or reshare.
struct Attribution {
    label: &'static str,
    name: String,
    headline: Option<String>,
}

fn attribution(update: &Value) -> Option<Attribution> {
    let attribute = update
        .pointer("/actor/image/attributes/0")
        .and_then(Value::as_object)?;
    if let Some(mini) = attribute.get("miniProfile").and_then(Value::as_object) {
        let name = [text(mini, "firstName"), text(mini, "lastName")]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        return Some(Attribution {
            label: "AUTHOR",
            name,
            headline: text(mini, "occupation").map(str::to_string),
        });
    }
    let company = attribute.get("miniCompany").and_then(Value::as_object)?;
    Some(Attribution {
        label: "COMPANY",
        name: text(company, "name").unwrap_or("Unknown").to_string(),
        headline: None,
    })
}

fn push_attribution(out: &mut String, heading: &str, source: Option<Attribution>) {
    let Some(source) = source else {
        return;
    };
    out.push_str(&format!("{heading}:\n- {}: {}\n", source.label, source.name));
    if let Some(headline) = source.headline {
        out.push_str(&format!("- HEADLINE: {headline}\n"));
    }
}

fn commentary(update: &Value) -> Option<&str> {
    update
        .pointer("/commentary/text/text")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Renders one feed update. An update whose actor is someone else is a
/// repost; one carrying a `resharedUpdate` is a reshare with commentary.
fn render_post(post: &Map<String, Value>, member_urn: Option<&str>) -> String {
    let update = Value::Object(post.clone());
    let actor = update.pointer("/actor/urn").and_then(Value::as_str);
    let reposted = matches!((actor, member_urn), (Some(actor), Some(member)) if actor != member);
    let reshared = !reposted && post.get("resharedUpdate").is_some_and(Value::is_object);

    let mut out = String::new();
    if reposted {
        out.push_str("[Reposted a post]\n");
        push_attribution(&mut out, "REPOSTED FROM", attribution(&update));
    } else if let Some(original) = post.get("resharedUpdate").filter(|_| reshared) {
        out.push_str("[Reshared a post]\n");
        push_attribution(&mut out, "RESHARED FROM", attribution(original));
    } else {
        out.push_str("[Posted]\n");
    }

    let counts = update.pointer("/socialDetail/totalSocialActivityCounts");
    let count = |key: &str| {
        counts
            .and_then(|c| c.get(key))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };
    let reactions: Vec<String> = counts
        .and_then(|c| c.get("reactionTypeCounts"))
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|reaction| {
                    let kind = reaction.get("reactionType").and_then(Value::as_str)?;
                    let n = reaction.get("count").and_then(Value::as_u64).unwrap_or(0);
                    Some(format!("{n} ({kind})"))
                })
                .collect()
        })
        .unwrap_or_default();
    out.push_str(&format!("REACTIONS: {}\n", reactions.join(", ")));
    out.push_str(&format!("COMMENTS: {}\n", count("numComments")));
    out.push_str(&format!("SHARES: {}\n", count("numShares")));

    if reshared
        && let Some(original) = post.get("resharedUpdate").and_then(commentary)
    {
        out.push_str(&quoted("ORIGINAL CONTENT", original));
    }
    if let Some(content) = commentary(&update) {
        let label = if reposted {
            "ORIGINAL CONTENT"
        } else if reshared {
            "RESHARE COMMENTARY"
        } else {
            "CONTENT"
        };
        out.push_str(&quoted(label, content));
    }
    out
}
