pub mod bitmap_ref_mut;
pub mod mapped_rwlockreadguard;
