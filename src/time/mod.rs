//! Dates, day counts, calendars, and payment schedules

mod calendar;
mod daycount;
mod schedule;

pub use calendar::{
    add_months, days_in_month, end_of_month, whole_months, BusinessDayConvention, Calendar,
};
pub use daycount::{is_leap_year, DayCount};
pub use schedule::{payment_schedule, PaymentFrequency, SchedulePeriod};
