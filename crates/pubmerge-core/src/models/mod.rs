pub mod merged;
pub mod publication;
pub mod record;

pub use merged::{
    FieldConflict, MergedAuthor, MergedIdentifiers, MergedRecord, MergedTag, Provenanced,
    SourceFailure,
};
pub use publication::{PublicationRef, is_valid_key, load_publications};
pub use record::{IdKind, RecordIdentifiers, SourceRecord, SubjectTag};
