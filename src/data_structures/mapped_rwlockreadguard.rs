use spin::RwLockReadGuard;
use core::ops::Deref;

/// A read guard projected onto a field of the guarded value.
///
/// Lets `KERNEL.mb_info()` hand out the boot info without exposing the
/// whole inner record or cloning the tag data.
pub struct MappedRwLockReadGuard<'a, T: 'a + ?Sized, U: 'a + ?Sized> {
    guard: RwLockReadGuard<'a, T>,
    mapper: fn(&T) -> &U,
}

impl<'a, T: 'a + ?Sized, U: 'a + ?Sized> MappedRwLockReadGuard<'a, T, U> {
    pub fn new(guard: RwLockReadGuard<'a, T>, mapper: fn(&T) -> &U) -> Self {
        MappedRwLockReadGuard { guard, mapper }
    }
}

impl<'a, T: 'a + ?Sized, U: 'a + ?Sized> Deref for MappedRwLockReadGuard<'a, T, U> {
    type Target = U;

    fn deref(&self) -> &Self::Target {
        (self.mapper)(&self.guard)
    }
}
