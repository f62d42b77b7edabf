// Extraction LLM prompt templates.
// All prompts for the extraction module are defined here.

pub const RESUME_EXTRACT_SYSTEM: &str = "\
You are a precise resume data extractor for an applicant tracking system. \
Read the resume text and return one JSON object describing the candidate. \
You MUST respond with valid JSON only — no markdown fences, no explanations. \
Never invent contact details: use null when a value is not present in the text.";

pub const RESUME_EXTRACT_PROMPT: &str = r#"Extract the candidate profile from the resume text below.

RESUME TEXT:
{resume_text}

OUTPUT SCHEMA (return exactly this structure):
{
  "name": "string",
  "email": "string" | null,
  "phone": "string" | null,
  "role": "string (current or most recent job title)",
  "experience": integer (total years of professional experience, 0 if unknown),
  "skills": ["string"],
  "summary": "string (one sentence professional summary)",
  "location": "string (City, Country)" | null,
  "willing_to_relocate": boolean
}

RULES:
1. "skills" is a flat list of short skill names, at most 20 entries.
2. "experience" is a whole number; round down partial years.
3. "willing_to_relocate" is true only if the resume says so explicitly.
4. Return ONLY the JSON object — nothing else, no code fences."#;

pub const LOCATION_EXTRACT_SYSTEM: &str = "\
You extract a candidate's current location from resume text. \
You MUST respond with valid JSON only — no markdown fences, no explanations.";

pub const LOCATION_EXTRACT_PROMPT: &str = r#"Find where this candidate currently lives or works.

RESUME TEXT:
{resume_text}

OUTPUT SCHEMA:
{"location": "City, Country" | null, "willing_to_relocate": boolean | null}

Return null for anything the text does not state."#;
