//! Instruction prompt sent with every analyze call, and the result contract
//! it asks the model to honour.
//!
//! The prompt is the only place the response schema is described to the
//! model. `RESULT_FIELDS` mirrors it so the handler can flag replies that
//! drifted from the contract without rejecting them.

use serde_json::Value;

/// Portal the model must fall back to instead of inventing URLs.
pub const FALLBACK_PORTAL_URL: &str = "https://www.service-public.fr";

pub const DEFAULT_INSTRUCTIONS: &str = r#"Tu es Clarifia, un assistant qui aide les particuliers à comprendre leurs documents administratifs (courriers, formulaires, avis, convocations).
Analyse le texte fourni par l'utilisateur et réponds UNIQUEMENT avec un JSON valide, sans texte avant ou après et sans balises Markdown, qui respecte exactement ce schéma :
{
  "summary": "string",
  "what_it_means": "string",
  "deadlines": [{ "label": "string", "date": "YYYY-MM-DD ou null", "notes": "string" }],
  "steps": [{ "title": "string", "details": "string" }],
  "missing_info": ["string"],
  "risks": ["string"],
  "official_sites": [{ "name": "string", "url": "string" }]
}
Règles :
- Si une date est incertaine ou absente du document, mets "date": null et explique pourquoi dans "notes".
- N'invente jamais de lien. Si tu ne connais pas l'adresse exacte d'un site officiel, utilise https://www.service-public.fr.
- Écris en français, de façon claire, concrète et sans jargon.
- Si une information nécessaire manque, ajoute-la dans "missing_info" plutôt que de la supposer."#;

/// Top-level keys the instructions ask for, in prompt order.
pub const RESULT_FIELDS: [&str; 7] = [
    "summary",
    "what_it_means",
    "deadlines",
    "steps",
    "missing_info",
    "risks",
    "official_sites",
];

/// Returns the contract keys absent from a parsed reply. A non-object reply
/// is missing all of them.
pub fn missing_result_fields(value: &Value) -> Vec<&'static str> {
    match value.as_object() {
        Some(obj) => RESULT_FIELDS
            .iter()
            .copied()
            .filter(|field| !obj.contains_key(*field))
            .collect(),
        None => RESULT_FIELDS.to_vec(),
    }
}
