use chrono::{Datelike, Local, Utc};

use crate::Year2;

/// A source for the calendar year embedded in issued identifiers.
///
/// The allocator reads the year once per call, so the year can roll over
/// between two allocations. Tests plug in a [`FixedCalendar`] to get
/// deterministic identifiers.
///
/// # Example
///
/// ```
/// use rollseq::{CalendarSource, Year2};
///
/// struct AcademicYear;
/// impl CalendarSource for AcademicYear {
///     fn current_year(&self) -> i32 {
///         2031
///     }
/// }
///
/// assert_eq!(AcademicYear.current_year2(), Year2::from_year(2031));
/// ```
pub trait CalendarSource {
    /// Returns the full calendar year (e.g. `2025`).
    fn current_year(&self) -> i32;

    /// Returns the last two digits of [`Self::current_year`].
    fn current_year2(&self) -> Year2 {
        Year2::from_year(self.current_year())
    }
}

impl<C: CalendarSource + ?Sized> CalendarSource for &C {
    fn current_year(&self) -> i32 {
        (**self).current_year()
    }
}

/// Calendar year in UTC.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemCalendar;

impl CalendarSource for SystemCalendar {
    fn current_year(&self) -> i32 {
        Utc::now().year()
    }
}

/// Calendar year in the host's local timezone.
///
/// Useful when approvals around New Year's Eve should follow the campus
/// clock rather than UTC.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalCalendar;

impl CalendarSource for LocalCalendar {
    fn current_year(&self) -> i32 {
        Local::now().year()
    }
}

/// A calendar pinned to one year.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedCalendar(pub i32);

impl CalendarSource for FixedCalendar {
    fn current_year(&self) -> i32 {
        self.0
    }
}
