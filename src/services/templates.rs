// Template service
// Built-in seeding, custom template CRUD, A/B variants, and placeholder fill-in.

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

use crate::db::{stored_instant, DbProspect, DbTemplate, FlowDb};
use crate::entitlement::{can_add_template, can_view_ab_analytics, Feature};
use crate::error::FlowError;
use crate::types::{TemplateCategory, UserProfile};
use crate::util::first_name;

pub const VARIANT_LETTERS: [&str; 6] = ["A", "B", "C", "D", "E", "F"];

/// Sends a variant needs before it can be declared the winner.
pub const MIN_SENDS_FOR_WINNER: u32 = 5;

pub const PRODUCT_FALLBACK: &str = "[your product/service]";
pub const MY_NAME_FALLBACK: &str = "[your name]";

/// Placeholders `replace_placeholders` understands, with a short description.
pub const PLACEHOLDERS: [(&str, &str); 4] = [
    ("{{name}}", "Prospect's full name"),
    ("{{firstName}}", "Prospect's first name"),
    ("{{product}}", "Your product/service (from profile)"),
    ("{{myName}}", "Your name (from profile)"),
];

pub struct BuiltInTemplate {
    pub name: &'static str,
    pub category: TemplateCategory,
    pub content: &'static str,
}

pub const BUILT_IN_TEMPLATES: [BuiltInTemplate; 7] = [
    BuiltInTemplate {
        name: "Friendly Introduction",
        category: TemplateCategory::InitialOutreach,
        content: "Hey {{name}}! I noticed we have some mutual connections and thought I'd reach out. I help people with {{product}} - would love to connect!",
    },
    BuiltInTemplate {
        name: "Value-First Approach",
        category: TemplateCategory::InitialOutreach,
        content: "Hi {{name}}, I came across your profile and love what you're doing! I have some ideas that might help with your goals. Mind if I share?",
    },
    BuiltInTemplate {
        name: "Gentle Check-In",
        category: TemplateCategory::FollowUp,
        content: "Hey {{name}}, just wanted to follow up on our last chat. Any questions I can answer for you?",
    },
    BuiltInTemplate {
        name: "Value Add",
        category: TemplateCategory::FollowUp,
        content: "Hi {{name}}! Thought of you when I saw this tip. How's everything going?",
    },
    BuiltInTemplate {
        name: "Price Concern",
        category: TemplateCategory::ObjectionHandler,
        content: "I totally understand, {{name}}. What if I showed you how it could actually save you money in the long run? Would that help?",
    },
    BuiltInTemplate {
        name: "Timing Concern",
        category: TemplateCategory::ObjectionHandler,
        content: "No rush at all, {{name}}! When would be a better time to revisit this? I'll follow up then.",
    },
    BuiltInTemplate {
        name: "Client Appreciation",
        category: TemplateCategory::CheckIn,
        content: "Hey {{name}}! Just wanted to check in and see how everything is going. Let me know if you need anything!",
    },
];

fn re_placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z]+)\s*\}\}").unwrap())
}

// =============================================================================
// Seeding
// =============================================================================

/// Insert any stock template not already present. Safe to call on every launch.
pub fn seed_built_in_templates(db: &FlowDb, now: DateTime<Utc>) -> Result<usize, FlowError> {
    let inserted = db.with_transaction(|tx| -> Result<usize, FlowError> {
        let existing: HashSet<String> = tx
            .list_templates(None)?
            .into_iter()
            .filter(|t| t.is_built_in)
            .map(|t| t.name)
            .collect();

        let mut inserted = 0;
        for stock in BUILT_IN_TEMPLATES.iter() {
            if existing.contains(stock.name) {
                continue;
            }
            tx.insert_template(&DbTemplate::new(
                stock.name,
                stock.category,
                stock.content,
                true,
                now,
            ))?;
            inserted += 1;
        }
        Ok(inserted)
    })?;

    if inserted > 0 {
        log::info!("Seeded {} built-in templates", inserted);
    }
    Ok(inserted)
}

// =============================================================================
// CRUD
// =============================================================================

fn validated(name: &str, content: &str) -> Result<(String, String), FlowError> {
    let name = name.trim();
    let content = content.trim();
    if name.is_empty() {
        return Err(FlowError::Validation("Template name is required".to_string()));
    }
    if content.is_empty() {
        return Err(FlowError::Validation("Template message is required".to_string()));
    }
    Ok((name.to_string(), content.to_string()))
}

pub fn load_template(db: &FlowDb, id: &str) -> Result<DbTemplate, FlowError> {
    db.get_template(id)?
        .ok_or_else(|| FlowError::NotFound(format!("template {id}")))
}

pub fn create_template(
    db: &FlowDb,
    name: &str,
    category: TemplateCategory,
    content: &str,
    is_pro: bool,
    now: DateTime<Utc>,
) -> Result<DbTemplate, FlowError> {
    let (name, content) = validated(name, content)?;
    db.with_transaction(|tx| {
        if !can_add_template(tx.count_custom_templates()?, is_pro) {
            log::info!("Custom template limit reached");
            return Err(FlowError::EntitlementDenied(Feature::AddTemplate));
        }
        let template = DbTemplate::new(&name, category, &content, false, now);
        tx.insert_template(&template)?;
        Ok(template)
    })
}

pub fn update_template(
    db: &FlowDb,
    id: &str,
    name: &str,
    category: TemplateCategory,
    content: &str,
    now: DateTime<Utc>,
) -> Result<DbTemplate, FlowError> {
    let (name, content) = validated(name, content)?;
    db.with_transaction(|tx| {
        let mut template = load_template(tx, id)?;
        template.name = name;
        template.category = category;
        template.content = content;
        template.updated_at = stored_instant(now).max(template.created_at);
        tx.update_template(&template)?;
        Ok(template)
    })
}

pub fn delete_template(db: &FlowDb, id: &str) -> Result<(), FlowError> {
    let template = load_template(db, id)?;
    if template.is_built_in {
        return Err(FlowError::Validation(
            "Built-in templates cannot be deleted".to_string(),
        ));
    }
    db.delete_template(id)?;
    Ok(())
}

// =============================================================================
// A/B variants
// =============================================================================

/// Clone `source_id` into an A/B variant with the next free letter.
///
/// An ungrouped source starts a new group and becomes variant "A".
pub fn create_variant(
    db: &FlowDb,
    source_id: &str,
    name: &str,
    content: &str,
    is_pro: bool,
    now: DateTime<Utc>,
) -> Result<DbTemplate, FlowError> {
    let (name, content) = validated(name, content)?;
    db.with_transaction(|tx| {
        if !can_add_template(tx.count_custom_templates()?, is_pro) {
            return Err(FlowError::EntitlementDenied(Feature::AddTemplate));
        }

        let mut source = load_template(tx, source_id)?;
        let group = match source.variant_group.clone() {
            Some(group) => group,
            None => {
                let group = uuid::Uuid::new_v4().to_string();
                source.variant_group = Some(group.clone());
                source.variant_letter = Some(VARIANT_LETTERS[0].to_string());
                source.updated_at = stored_instant(now).max(source.created_at);
                tx.update_template(&source)?;
                group
            }
        };

        let used: HashSet<String> = tx
            .templates_in_group(&group)?
            .into_iter()
            .filter_map(|t| t.variant_letter)
            .collect();
        let letter = VARIANT_LETTERS
            .iter()
            .find(|l| !used.contains(**l))
            .ok_or_else(|| {
                FlowError::Validation(format!(
                    "A test can have at most {} variants",
                    VARIANT_LETTERS.len()
                ))
            })?;

        let mut variant = DbTemplate::new(&name, source.category, &content, false, now);
        variant.variant_group = Some(group);
        variant.variant_letter = Some(letter.to_string());
        tx.insert_template(&variant)?;
        Ok(variant)
    })
}

/// Count a send, and remember the template on the prospect it went to.
pub fn record_sent(
    db: &FlowDb,
    template_id: &str,
    prospect_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), FlowError> {
    db.with_transaction(|tx| {
        if !tx.increment_template_sent(template_id, &now)? {
            return Err(FlowError::NotFound(format!("template {template_id}")));
        }
        if let Some(prospect_id) = prospect_id {
            if let Some(mut prospect) = tx.get_prospect(prospect_id)? {
                prospect.last_template_id = Some(template_id.to_string());
                prospect.touch(now);
                tx.update_prospect(&prospect)?;
            }
        }
        Ok(())
    })
}

/// Count a conversion. Never exceeds the number of sends.
pub fn record_conversion(db: &FlowDb, template_id: &str, now: DateTime<Utc>) -> Result<(), FlowError> {
    if db.increment_template_converted(template_id, &now)? {
        Ok(())
    } else {
        Err(FlowError::NotFound(format!("template {template_id}")))
    }
}

/// Highest conversion rate among variants with enough sends. Ties go to the
/// earlier letter.
pub fn ab_winner(variants: &[DbTemplate]) -> Option<&DbTemplate> {
    let mut best: Option<&DbTemplate> = None;
    let mut ordered: Vec<&DbTemplate> = variants
        .iter()
        .filter(|v| v.times_sent >= MIN_SENDS_FOR_WINNER)
        .collect();
    ordered.sort_by(|a, b| a.variant_letter.cmp(&b.variant_letter));
    for candidate in ordered {
        match best {
            Some(current) if candidate.conversion_rate() <= current.conversion_rate() => {}
            _ => best = Some(candidate),
        }
    }
    best
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantGroupReport {
    pub group: String,
    pub variants: Vec<DbTemplate>,
    pub winner_id: Option<String>,
}

/// Every A/B group with its current winner. Pro only.
pub fn ab_report(db: &FlowDb, is_pro: bool) -> Result<Vec<VariantGroupReport>, FlowError> {
    if !can_view_ab_analytics(is_pro) {
        return Err(FlowError::EntitlementDenied(Feature::AbAnalytics));
    }
    let mut groups: BTreeMap<String, Vec<DbTemplate>> = BTreeMap::new();
    for template in db.list_templates(None)? {
        if let Some(group) = template.variant_group.clone() {
            groups.entry(group).or_default().push(template);
        }
    }
    Ok(groups
        .into_iter()
        .map(|(group, mut variants)| {
            variants.sort_by(|a, b| a.variant_letter.cmp(&b.variant_letter));
            let winner_id = ab_winner(&variants).map(|w| w.id.clone());
            VariantGroupReport {
                group,
                variants,
                winner_id,
            }
        })
        .collect())
}

// =============================================================================
// Placeholders
// =============================================================================

/// Fill in `{{name}}`, `{{firstName}}`, `{{product}}` and `{{myName}}`.
/// Unset profile values become visible bracketed prompts.
pub fn replace_placeholders(template: &str, prospect: &DbProspect, profile: &UserProfile) -> String {
    let product = match profile.offering.trim() {
        "" => PRODUCT_FALLBACK,
        offering => offering,
    };
    let my_name = match profile.name.trim() {
        "" => MY_NAME_FALLBACK,
        name => name,
    };
    template
        .replace("{{name}}", &prospect.name)
        .replace("{{firstName}}", first_name(&prospect.name))
        .replace("{{product}}", product)
        .replace("{{myName}}", my_name)
}

/// Placeholder tokens in `content` that `replace_placeholders` will not fill.
pub fn unknown_placeholders(content: &str) -> Vec<String> {
    let known: HashSet<&str> = PLACEHOLDERS.iter().map(|(token, _)| *token).collect();
    re_placeholder()
        .find_iter(content)
        .map(|m| m.as_str().to_string())
        .filter(|token| !known.contains(token.as_str()))
        .collect()
}
