//! In-memory editing state for the allocation wizard.

pub mod debounce;
pub mod wizard;

pub use debounce::{DEFAULT_DEBOUNCE, DebouncedEdits};
pub use wizard::{
    AllocationUpdate, EntityPracticeShare, SessionEdit, SessionError, SubcomponentUpdate,
    WizardSession,
};
