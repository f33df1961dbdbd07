use async_graphql::{InputValueError, InputValueResult, Scalar, ScalarType, Value};
use time::format_description::well_known::Rfc3339;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, Time};

pub mod branch;
pub mod event;
pub mod hours;
pub mod sponsor;
pub mod stats;
pub mod user;

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");
const TIME_FORMAT: &[FormatItem<'static>] = format_description!("[hour]:[minute]");
const TIME_WITH_SECONDS_FORMAT: &[FormatItem<'static>] =
    format_description!("[hour]:[minute]:[second]");

/// A calendar date, formatted as `YYYY-MM-DD`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateScalar(pub Date);

#[Scalar(name = "Date")]
impl ScalarType for DateScalar {
    fn parse(value: Value) -> InputValueResult<Self> {
        if let Value::String(date_str) = &value {
            if let Ok(date) = Date::parse(date_str, DATE_FORMAT) {
                return Ok(DateScalar(date));
            }
        }

        Err(InputValueError::expected_type(value))
    }

    fn to_value(&self) -> Value {
        Value::String(self.0.format(DATE_FORMAT).unwrap_or_default())
    }
}

/// A time of day, formatted as `HH:MM` (seconds are accepted on input)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeScalar(pub Time);

#[Scalar(name = "Time")]
impl ScalarType for TimeScalar {
    fn parse(value: Value) -> InputValueResult<Self> {
        if let Value::String(time_str) = &value {
            if let Ok(time) = Time::parse(time_str, TIME_FORMAT)
                .or_else(|_| Time::parse(time_str, TIME_WITH_SECONDS_FORMAT))
            {
                return Ok(TimeScalar(time));
            }
        }

        Err(InputValueError::expected_type(value))
    }

    fn to_value(&self) -> Value {
        Value::String(self.0.format(TIME_FORMAT).unwrap_or_default())
    }
}

/// A timestamp, formatted as RFC 3339
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateTime(pub OffsetDateTime);

#[Scalar]
impl ScalarType for DateTime {
    fn parse(value: Value) -> InputValueResult<Self> {
        if let Value::String(date_str) = &value {
            if let Ok(date_time) = OffsetDateTime::parse(date_str, &Rfc3339) {
                return Ok(DateTime(date_time));
            }
        }

        Err(InputValueError::expected_type(value))
    }

    fn to_value(&self) -> Value {
        Value::String(self.0.format(&Rfc3339).unwrap_or_default())
    }
}

impl From<OffsetDateTime> for DateTime {
    fn from(time: OffsetDateTime) -> Self {
        DateTime(time)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::{date, time};

    use super::*;

    #[test]
    fn dates_and_times_use_plain_formats() {
        assert_eq!(
            DateScalar::parse(Value::String("2024-03-09".to_owned())).unwrap(),
            DateScalar(date!(2024 - 03 - 09))
        );
        assert_eq!(
            TimeScalar::parse(Value::String("09:30".to_owned())).unwrap(),
            TimeScalar(time!(9:30))
        );
        assert_eq!(
            TimeScalar::parse(Value::String("17:05:00".to_owned())).unwrap(),
            TimeScalar(time!(17:05))
        );
        assert_eq!(
            TimeScalar(time!(17:05)).to_value(),
            Value::String("17:05".to_owned())
        );
        assert!(DateScalar::parse(Value::String("03/09/2024".to_owned())).is_err());
    }
}
