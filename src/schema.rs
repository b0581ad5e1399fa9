//! The extraction contract shared by every entry point: one instruction
//! template, one list of required keys, and the response post-processing
//! that turns raw service text into a verdict.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::InputKind;

pub const INSTRUCTION_VERSION: u32 = 3;

pub const REQUIRED_KEYS: [&str; 5] = ["species", "location", "ecosystem", "habitat", "relationships"];

pub const NOT_APPLICABLE: &str = "N/A";

pub const SYSTEM_INSTRUCTIONS: &str = r#"**Your role**
You are a research assistant specializing in invasion biology or ecology. Your primary task is to read and analyze the content of provided papers to extract relevant information.

The field of invasion biology is defined as follows: a research area focusing on the translocation, establishment, spread, impact, and management of species outside of their native ranges, where they are referred to as non-native or alien species.

The information extraction task is centered on the following entities: species, habitat, location, and ecosystem.

The entities are defined as:
1. **Species**: This includes both specific, formally named species (e.g., *Asterias amurensis*) and broader categories of organisms relevant to the study (e.g., "demersal fish" or "aquatic invertebrates"). These may include plants, animals, fungi, or microbes that are translocated to new environments, where they establish, spread, and potentially cause ecological or economic impacts. The term may also encompass higher-level taxonomic groups or functional groups when specific species are not identified in the text. Note generic terms like "invasive species" is not considered a species name.
2. **Location**: The study site, which could range from a specific geographic feature (e.g., "Port Phillip Bay, southern Australia") to broader geopolitical regions (e.g., "southern Australia" or "the Amazon rainforest"). Locations may include natural features such as rivers, bays, or mountains, as well as administrative areas like cities, states, or countries.
3. **Ecosystem**: A system comprising interacting biological and abiotic components. Ecosystems often extend beyond specific locations (e.g., the savannah ecosystem spans geopolitical boundaries such as Kenya and Tanzania).
4. **Habitat**: A subcomponent of an ecosystem where a specific organism lives. For example, crocodiles inhabit freshwater habitats (e.g., rivers) within the broader savannah ecosystem.

**Your tasks:**
1. Upon receiving an article, identify and extract data according to the predefined schema specified below. Record values for each entity specified in the schema and relations between the extracted entities as well as their specified properties. If a property is not mentioned in the article, denote this with a "-".
2. For each identified relationship, name it so that the name reflects the semantic nature of the interaction between the related entities within invasion biology, and give the context from the paper text where it was found.
3. Note that not all papers that might be provided by the user are addressing a problem in invasion biology. If you are provided a paper input that is not an invasion biology paper, return N/A as your response.

**Extraction schema**
{
  "species": [
    {
      "name": "species_name",
      "properties": {
        "role": "native/introduced/alien/invasive",
        "taxonomy_level": "species/genus/family"
      }
    }
  ],
  "location": [
    {
      "name": "location_name",
      "properties": {
        "category": "natural/administrative",
        "geopolitical_info": "country/region/city",
        "additional_details": "climatic/physiographic"
      }
    }
  ],
  "ecosystem": [
    {
      "name": "ecosystem_name",
      "properties": {
        "type": "aquatic/terrestrial/marine",
        "scope": "local/regional/global"
      }
    }
  ],
  "habitat": [
    {
      "name": "habitat_name",
      "properties": {
        "type": "aquatic/terrestrial/marine",
        "subcomponent_of": "ecosystem_name",
        "specifics": "e.g., benthic, litoral"
      }
    }
  ],
  "relationships": [
    {
      "related_entities": ["entity1", "entity2", "..."],
      "relationship_properties": {
        "name": "relationship_name",
        "type": "biological/physical/ecological/anthropogenic",
        "directionality": "unidirectional/bidirectional",
        "context": "relationship_contextual_description"
      }
    }
  ]
}

**Output Response Format:**
1. Your response must always be in valid JSON format conforming to the specified schema.
2. If the paper is not relevant to invasion biology, return:
  "N/A"
"#;

/// Text of one paper as it is sent to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaperInput {
    TitleAbstract { title: String, abstract_text: String },
    FullText { text: String },
}

impl PaperInput {
    pub fn kind(&self) -> InputKind {
        match self {
            PaperInput::TitleAbstract { .. } => InputKind::TitleAbstract,
            PaperInput::FullText { .. } => InputKind::FullText,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaperInput::TitleAbstract {
                title,
                abstract_text,
            } => format!(
                "Extract the information as instructed from this article title and abstract.\n\nTitle: {title}\nAbstract: {abstract_text}"
            ),
            PaperInput::FullText { text } => {
                format!("Extract the information as instructed from this full paper text.\n\n{text}")
            }
        }
    }
}

/// Outcome of checking a cleaned response against the schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Valid(Value),
    MissingKeys(Vec<String>),
    ParseError(String),
}

/// Strips surrounding whitespace and a markdown code fence.
pub fn clean_response(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_prefix = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let without_suffix = without_prefix
        .strip_suffix("```")
        .unwrap_or(without_prefix);
    without_suffix.trim().to_string()
}

/// Exact sentinel match, tolerating quotes, markdown emphasis, a trailing
/// period and case.
pub fn is_not_applicable(cleaned: &str) -> bool {
    let decoration = |c: char| matches!(c, '"' | '\'' | '`' | '*');
    let value = cleaned
        .trim()
        .trim_matches(decoration)
        .trim()
        .trim_end_matches('.')
        .trim_matches(decoration)
        .trim();
    value.eq_ignore_ascii_case(NOT_APPLICABLE)
}

pub fn validate(cleaned: &str) -> Verdict {
    let value: Value = match serde_json::from_str(cleaned) {
        Ok(value) => value,
        Err(err) => return Verdict::ParseError(err.to_string()),
    };
    let missing = missing_keys(&value);
    if missing.is_empty() {
        Verdict::Valid(value)
    } else {
        Verdict::MissingKeys(missing)
    }
}

fn missing_keys(value: &Value) -> Vec<String> {
    let object = value.as_object();
    REQUIRED_KEYS
        .iter()
        .filter(|key| object.map(|map| !map.contains_key(**key)).unwrap_or(true))
        .map(|key| key.to_string())
        .collect()
}

/// One `species`/`location`/`ecosystem`/`habitat` entry. Property values are
/// kept as raw JSON since the service does not always return strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl EntityEntry {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipEntry {
    #[serde(default)]
    pub related_entities: Vec<String>,
    #[serde(default)]
    pub relationship_properties: BTreeMap<String, Value>,
}

impl RelationshipEntry {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.relationship_properties.get(key).and_then(Value::as_str)
    }
}
