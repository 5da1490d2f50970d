//! Weekend flight price tasks.
//!
//! One task per weekend (Friday to Sunday) of a month. Weekends whose
//! Friday or Sunday falls outside the month still get a task, with no
//! instructions, so they fail validation and show up in the report.

use chrono::{Datelike, Days, NaiveDate, Weekday};
use deskrun_core::TaskDescriptor;

/// Weekends checked per month.
pub const WEEKENDS: u32 = 5;

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// English name of a 1-based month.
pub fn month_name(month: u32) -> Option<&'static str> {
    let index = usize::try_from(month.checked_sub(1)?).ok()?;
    MONTHS.get(index).copied()
}

/// Friday and Sunday of the `n`th weekend, if both fall inside the month.
pub fn nth_weekend(year: i32, month: u32, n: u32) -> Option<(NaiveDate, NaiveDate)> {
    if n == 0 {
        return None;
    }
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let to_friday = (7 + Weekday::Fri.num_days_from_monday()
        - first.weekday().num_days_from_monday())
        % 7;
    let friday = first.checked_add_days(Days::new(u64::from(to_friday + 7 * (n - 1))))?;
    let sunday = friday.checked_add_days(Days::new(2))?;

    if friday.month() != month || sunday.month() != month {
        return None;
    }
    Some((friday, sunday))
}

/// Search parameters shared by every weekend task.
#[derive(Debug, Clone)]
pub struct FlightSearch {
    pub origin: String,
    pub destination: String,
    pub year: i32,
    pub month: u32,
}

impl FlightSearch {
    /// One task per weekend, indexed by weekend number.
    pub fn tasks(&self) -> Vec<TaskDescriptor> {
        (1..=WEEKENDS).map(|n| self.task(n)).collect()
    }

    fn task(&self, weekend: u32) -> TaskDescriptor {
        let task = TaskDescriptor::new(weekend, format!("weekend {}", weekend), "")
            .with_param("origin", self.origin.clone())
            .with_param("destination", self.destination.clone())
            .with_param("weekend", weekend.to_string());

        match (nth_weekend(self.year, self.month, weekend), month_name(self.month)) {
            (Some((friday, sunday)), Some(month)) => TaskDescriptor {
                prompt: self.prompt(month, weekend, friday.day(), sunday.day()),
                ..task
            }
            .with_param("friday", friday.to_string())
            .with_param("sunday", sunday.to_string()),
            _ => task,
        }
    }

    fn prompt(&self, month: &str, weekend: u32, friday: u32, sunday: u32) -> String {
        format!(
            r#"First, navigate to: https://www.google.com/travel/flights
On the Google flight home page click the origin field with a circle icon on the left hand side. Type in the origin location: {origin}, select the nearest airport. Click the destination field with a maps icon on the left hand side. Type in the destination location: {destination}, select the nearest airport.
Click on the departure field. A calendar date-picker should open. Use the arrows on the left and right hand side of the date picker to find the month: {month}.

Your task is to return the cheapest flight price for weekend number **{weekend}** in {month}. The dates of this weekend are {friday} - {sunday}.

In the date picker the days are listed as "S M T W Th F S". Dates under "F" are Fridays and dates under the first "S" are Sundays.
Click on the "Departure" field, then click the Friday date: {friday}. Then click the Sunday date: {sunday}.

Make sure the selected Friday - Sunday is correct; if not, click the "Departure" field again and fix it.
Then click the blue "Done" button on the bottom right corner of the date picker.

Finally, click the "Search" button. A list of flights should load. Return the first flight price from the list without the dollar sign (e.g. 231) and NO OTHER TEXT."#,
            origin = self.origin,
            destination = self.destination,
            month = month,
            weekend = weekend,
            friday = friday,
            sunday = sunday,
        )
    }
}
