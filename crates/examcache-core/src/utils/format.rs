use chrono::Duration;

/// Human-readable age of something stamped `age` ago ("just now", "5m ago",
/// "2h ago", "3d ago"). Halves round up at the hour and day scales.
pub fn age_display(age: Duration) -> String {
    let minutes = age.num_minutes();
    if minutes < 1 {
        // Negative ages come from clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        if minutes % 60 >= 30 {
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        if (minutes % 1440) / 60 >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}

/// Human-readable time left until an expiry ("expired", "in 40m", "in 6d").
pub fn remaining_display(left: Duration) -> String {
    let minutes = left.num_minutes();
    if left <= Duration::zero() {
        "expired".to_string()
    } else if minutes < 60 {
        format!("in {}m", minutes.max(1))
    } else if minutes < 1440 {
        format!("in {}h", minutes / 60)
    } else {
        format!("in {}d", minutes / 1440)
    }
}

/// Mask the middle of a phone number for logs and status output,
/// keeping the first three and last four digits.
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 7 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 7), tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_display() {
        assert_eq!(age_display(Duration::seconds(20)), "just now");
        assert_eq!(age_display(Duration::minutes(-5)), "just now");
        assert_eq!(age_display(Duration::minutes(5)), "5m ago");
        assert_eq!(age_display(Duration::minutes(90)), "2h ago");
        assert_eq!(age_display(Duration::minutes(80)), "1h ago");
        assert_eq!(age_display(Duration::hours(36)), "2d ago");
        assert_eq!(age_display(Duration::hours(30)), "1d ago");
    }

    #[test]
    fn test_remaining_display() {
        assert_eq!(remaining_display(Duration::zero()), "expired");
        assert_eq!(remaining_display(Duration::seconds(10)), "in 1m");
        assert_eq!(remaining_display(Duration::hours(5)), "in 5h");
        assert_eq!(remaining_display(Duration::days(7)), "in 7d");
    }

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("13812345678"), "138****5678");
        assert_eq!(mask_phone("12345"), "*****");
    }
}
