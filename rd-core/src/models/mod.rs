mod activity;
mod business_year;
mod entity;

pub use activity::{ResearchActivity, SelectedActivity, SelectedSubcomponent, Subcomponent};
pub use business_year::{BusinessYear, LockedQre, YearData};
pub use entity::{Entity, EntityKind, EntitySubcomponentAllocation, EntityYearRecord, Role};
