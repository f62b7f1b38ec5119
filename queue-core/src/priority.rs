use std::fmt;

/// The default, totally ordered priority tag a [`crate::job::Job`] carries.
///
/// Due to the ordering `#[derive(Ord)]` builds from declaration order, this
/// **must** keep `Background` as the smallest variant: workers whose
/// fallback list is built by "everything below my primary" rely on it.
/// The queue and worker are generic over any `Ord` type, though — this is
/// just the default the pool ships with.
#[derive(Debug, Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Background,
    Batch,
    RealTime,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Priority::RealTime => "real_time",
                Priority::Batch => "batch",
                Priority::Background => "background",
            }
        )
    }
}

impl TryFrom<&str> for Priority {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "real_time" | "realtime" => Ok(Priority::RealTime),
            "batch" => Ok(Priority::Batch),
            "background" => Ok(Priority::Background),
            other => Err(format!("unknown priority: `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_background_below_real_time() {
        assert!(Priority::Background < Priority::Batch);
        assert!(Priority::Batch < Priority::RealTime);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(Priority::try_from("Real_Time").unwrap(), Priority::RealTime);
        assert!(Priority::try_from("urgent").is_err());
    }
}
