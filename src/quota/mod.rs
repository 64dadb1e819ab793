use crate::errors::GenError;
use crate::wire::UsageStats;

/// Remaining prompts a free user needs before a full submission.
pub const BULK_THRESHOLD: i64 = 10;
/// Remaining prompts a free user needs for a single action.
pub const SINGLE_THRESHOLD: i64 = 0;

fn check(stats: &UsageStats, threshold: i64) -> Result<(), GenError> {
    if stats.is_pro {
        return Ok(());
    }
    // single actions need at least one prompt left; bulk needs the threshold
    let required = threshold.max(1);
    if stats.remaining_prompts < required {
        return Err(GenError::QuotaExceeded { remaining: stats.remaining_prompts, required });
    }
    Ok(())
}

pub fn check_bulk(stats: &UsageStats) -> Result<(), GenError> {
    check(stats, BULK_THRESHOLD)
}

pub fn check_single(stats: &UsageStats) -> Result<(), GenError> {
    check(stats, SINGLE_THRESHOLD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_threshold() {
        assert!(check_bulk(&UsageStats { remaining_prompts: 9, is_pro: false }).is_err());
        assert!(check_bulk(&UsageStats { remaining_prompts: 10, is_pro: false }).is_ok());
        assert!(check_bulk(&UsageStats { remaining_prompts: 0, is_pro: true }).is_ok());
    }

    #[test]
    fn test_single_threshold() {
        assert_eq!(
            check_single(&UsageStats { remaining_prompts: 0, is_pro: false }),
            Err(GenError::QuotaExceeded { remaining: 0, required: 1 })
        );
        assert!(check_single(&UsageStats { remaining_prompts: 1, is_pro: false }).is_ok());
    }
}
