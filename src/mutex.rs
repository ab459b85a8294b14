/// Mutex guarding pipeline state: `parking_lot` with that feature, `std` otherwise.
///
/// The std flavor ignores poisoning. Sink calls never run while a `Lock` is held, so a panic
/// under one cannot leave the guarded state half-updated by a sink.
#[derive(Debug)]
pub(crate) struct Lock<T>(Inner<T>);

#[cfg(feature = "parking_lot")]
type Inner<T> = parking_lot::Mutex<T>;
#[cfg(feature = "parking_lot")]
pub(crate) type Guard<'a, T> = parking_lot::MutexGuard<'a, T>;

#[cfg(not(feature = "parking_lot"))]
type Inner<T> = std::sync::Mutex<T>;
#[cfg(not(feature = "parking_lot"))]
pub(crate) type Guard<'a, T> = std::sync::MutexGuard<'a, T>;

impl<T> Lock<T> {
    pub(crate) fn new(val: T) -> Self {
        Self(Inner::new(val))
    }

    #[cfg(feature = "parking_lot")]
    pub(crate) fn lock(&self) -> Guard<'_, T> {
        self.0.lock()
    }

    #[cfg(not(feature = "parking_lot"))]
    pub(crate) fn lock(&self) -> Guard<'_, T> {
        self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
