// Resume extraction: bytes → text → contact fields → structured profile.
// No persistence happens here; the ingestion orchestrator owns all side effects.

pub mod fields;
pub mod prompts;
pub mod structured;
pub mod text;
