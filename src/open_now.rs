//! Decide whether a venue is open at a given point in the week, from the hours text found on the
//! event site.
//!
//! Only one shape of time range is understood, e.g. "11:30 am–8 pm" or "5 - 11 PM". The end
//! needs an explicit am/pm, the start may leave it out. Anything we can't make sense of counts as
//! closed.

use crate::models::Hours;
use chrono::{Datelike, Timelike, Weekday};
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag_no_case, take_while, take_while_m_n},
    character::complete::{char, one_of},
    combinator::{map_res, opt, value, verify},
    sequence::preceded,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Meridiem {
    Am,
    Pm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClockTime {
    hour: u32,
    minute: u32,
    meridiem: Option<Meridiem>,
}

impl ClockTime {
    fn minutes(&self) -> u32 {
        let hour = match (self.meridiem, self.hour) {
            (Some(Meridiem::Am), 12) => 0,
            (Some(Meridiem::Pm), h) if h < 12 => h + 12,
            (_, h) => h,
        };
        hour * 60 + self.minute
    }
}

fn space(i: &str) -> IResult<&str, &str> {
    // the site uses non-breaking spaces, so not just ascii here
    take_while(char::is_whitespace).parse(i)
}

fn hour(i: &str) -> IResult<&str, u32> {
    verify(
        map_res(take_while_m_n(1, 2, |c: char| c.is_ascii_digit()), |s: &str| {
            s.parse::<u32>()
        }),
        |h: &u32| (1..=12).contains(h),
    )
    .parse(i)
}

fn minute(i: &str) -> IResult<&str, u32> {
    preceded(
        char(':'),
        verify(
            map_res(take_while_m_n(2, 2, |c: char| c.is_ascii_digit()), |s: &str| {
                s.parse::<u32>()
            }),
            |m: &u32| *m <= 59,
        ),
    )
    .parse(i)
}

fn meridiem(i: &str) -> IResult<&str, Meridiem> {
    alt((
        value(Meridiem::Am, tag_no_case("am")),
        value(Meridiem::Pm, tag_no_case("pm")),
    ))
    .parse(i)
}

fn start_time(i: &str) -> IResult<&str, ClockTime> {
    (hour, opt(minute), space, opt(meridiem))
        .map(|(hour, minute, _, meridiem)| ClockTime {
            hour,
            minute: minute.unwrap_or(0),
            meridiem,
        })
        .parse(i)
}

fn end_time(i: &str) -> IResult<&str, ClockTime> {
    (hour, opt(minute), space, meridiem)
        .map(|(hour, minute, _, meridiem)| ClockTime {
            hour,
            minute: minute.unwrap_or(0),
            meridiem: Some(meridiem),
        })
        .parse(i)
}

fn time_range(i: &str) -> IResult<&str, (ClockTime, ClockTime)> {
    (start_time, space, one_of("-–—"), space, end_time)
        .map(|(start, _, _, _, end)| (start, end))
        .parse(i)
}

/// Find the first time range in `text` and return it as minutes since midnight.
///
/// "5–11 pm" is read as 5 PM to 11 PM. A start hour without am/pm is taken as PM when the end is
/// PM and the start hour is 1 through 11. A bare 12 stays at noon.
pub fn parse_range(text: &str) -> Option<(u32, u32)> {
    let mut prev = None;
    for (idx, c) in text.char_indices() {
        // don't start in the middle of a number
        let at_boundary = !prev.is_some_and(|p: char| p.is_ascii_digit());
        prev = Some(c);
        if !at_boundary || !c.is_ascii_digit() {
            continue;
        }
        if let Ok((_, (mut start, end))) = time_range(&text[idx..]) {
            if start.meridiem.is_none()
                && end.meridiem == Some(Meridiem::Pm)
                && (1..=11).contains(&start.hour)
            {
                start.meridiem = Some(Meridiem::Pm);
            }
            return Some((start.minutes(), end.minutes()));
        }
    }
    None
}

/// True if `minutes` (since midnight) is within the range found in `text`, both ends included.
/// Ranges don't wrap past midnight.
pub fn is_time_in_range(text: &str, minutes: u32) -> bool {
    parse_range(text).is_some_and(|(start, end)| start <= minutes && minutes <= end)
}

pub fn is_open(hours: Option<&Hours>, day: Weekday, minutes: u32) -> bool {
    match hours {
        None => false,
        Some(Hours::Text(text)) => is_time_in_range(text, minutes),
        Some(Hours::Schedule(entries)) => {
            let day = day.to_string();
            entries
                .iter()
                .find(|e| e.day_of_week.trim().eq_ignore_ascii_case(&day))
                .is_some_and(|e| is_time_in_range(&e.hours_text, minutes))
        }
    }
}

/// [`is_open`] for a point in time
pub fn is_open_at<T: Datelike + Timelike>(hours: Option<&Hours>, at: &T) -> bool {
    is_open(hours, at.weekday(), at.hour() * 60 + at.minute())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScheduleEntry;
    use chrono::NaiveDate;

    const fn hm(h: u32, m: u32) -> u32 {
        h * 60 + m
    }

    #[test]
    fn explicit_meridiems() {
        let t = "11:30 am–8 pm";
        assert!(is_time_in_range(t, hm(13, 0)));
        assert!(!is_time_in_range(t, hm(9, 0)));
        assert!(!is_time_in_range(t, hm(20, 1)));
        assert!(is_time_in_range(t, hm(11, 30)));
        assert!(is_time_in_range(t, hm(20, 0)));
    }

    #[test]
    fn start_inherits_pm() {
        assert!(is_time_in_range("5–11 pm", hm(17, 0)));
        assert!(!is_time_in_range("5–11 pm", hm(5, 0)));
        assert_eq!(Some((hm(17, 0), hm(23, 0))), parse_range("5–11 pm"));
    }

    #[test]
    fn bare_twelve_is_noon() {
        assert!(!is_time_in_range("12–8 pm", hm(0, 30)));
        assert!(is_time_in_range("12–8 pm", hm(12, 30)));
    }

    #[test]
    fn midnight_and_noon() {
        assert_eq!(Some((0, hm(12, 0))), parse_range("12 am - 12 pm"));
        assert_eq!(Some((hm(12, 0), hm(23, 59))), parse_range("12pm-11:59PM"));
    }

    #[test]
    fn narrow_pm_guess_kept_as_is() {
        // start without meridiem before a pm end is always read as pm
        assert_eq!(Some((hm(23, 0), hm(14, 0))), parse_range("11–2 pm"));
        assert!(!is_time_in_range("11–2 pm", hm(12, 0)));
        assert_eq!(Some((hm(11, 0), hm(14, 0))), parse_range("11 am–2 pm"));
    }

    #[test]
    fn dashes_and_spacing() {
        for t in [
            "11am-9pm",
            "11 am - 9 pm",
            "11 AM — 9 PM",
            "11\u{a0}am\u{a0}–\u{a0}9\u{a0}pm",
            "Open daily 11 am–9 pm, closed Mondays",
        ] {
            assert_eq!(Some((hm(11, 0), hm(21, 0))), parse_range(t), "{t}");
        }
    }

    #[test]
    fn no_wrap_past_midnight() {
        assert_eq!(Some((hm(17, 0), 0)), parse_range("5 pm–12 am"));
        assert!(!is_time_in_range("5 pm–12 am", hm(18, 0)));
    }

    #[test]
    fn unparseable_is_closed() {
        for t in [
            "",
            "Call for hours",
            "11–9",
            "11 am to 9 pm",
            "13 am–9 pm",
            "11:75 am–9 pm",
            "11 am–",
        ] {
            assert_eq!(None, parse_range(t), "{t}");
            assert!(!is_time_in_range(t, hm(12, 0)));
        }
    }

    #[test]
    fn does_not_start_inside_number() {
        // "123-5 pm" must not be read as 3-5 pm
        assert_eq!(None, parse_range("123-5 pm"));
    }

    #[test]
    fn schedule_matches_day() {
        let hours = Hours::Schedule(vec![
            ScheduleEntry {
                day_of_week: "Thu".into(),
                hours_text: "5–9 pm".into(),
                ..Default::default()
            },
            ScheduleEntry {
                day_of_week: "fri".into(),
                hours_text: "11 am–9 pm".into(),
                ..Default::default()
            },
        ]);
        assert!(is_open(Some(&hours), Weekday::Fri, hm(20, 0)));
        assert!(!is_open(Some(&hours), Weekday::Fri, hm(10, 0)));
        assert!(!is_open(Some(&hours), Weekday::Sat, hm(20, 0)));
        assert!(!is_open(Some(&hours), Weekday::Sat, hm(12, 0)));
        assert!(is_open(Some(&hours), Weekday::Thu, hm(18, 0)));
    }

    #[test]
    fn text_and_absent() {
        let hours = Hours::Text("11:30 am–8 pm".into());
        assert!(is_open(Some(&hours), Weekday::Sun, hm(13, 0)));
        assert!(!is_open(None, Weekday::Sun, hm(13, 0)));
        assert!(!is_open(
            Some(&Hours::Schedule(Vec::new())),
            Weekday::Sun,
            hm(13, 0)
        ));
    }

    #[test]
    fn at_point_in_time() {
        let hours = Hours::Text("11 am–9 pm".into());
        // 2025-08-15 is a Friday
        let at = NaiveDate::from_ymd_opt(2025, 8, 15)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap();
        assert!(is_open_at(Some(&hours), &at));
        let late = at.with_hour(22).unwrap();
        assert!(!is_open_at(Some(&hours), &late));
    }
}
