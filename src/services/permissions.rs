use chrono::NaiveDate;

/// The acting user, collapsed to the single capability this service needs.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub is_administrator: bool,
}

/// Decide whether `actor` may generate a payment contract for a step.
///
/// Pure and clock-injected: `today` is start of day in the agency's
/// configured timezone, computed by the caller. Administrators bypass the
/// due-date restriction; nobody bypasses the already-created check.
/// The due-date boundary is inclusive: a step is eligible on its due date.
pub fn can_create_payment_contract(
    actor: &Actor,
    contract_created: bool,
    due_date: NaiveDate,
    today: NaiveDate,
) -> bool {
    if contract_created {
        return false;
    }
    if actor.is_administrator {
        return true;
    }
    today >= due_date
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{can_create_payment_contract, Actor};

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
    }

    fn staff() -> Actor {
        Actor {
            id: "u-staff".to_string(),
            is_administrator: false,
        }
    }

    fn admin() -> Actor {
        Actor {
            id: "u-admin".to_string(),
            is_administrator: true,
        }
    }

    #[test]
    fn due_date_boundary_is_inclusive() {
        let due = date("2025-06-15");
        assert!(can_create_payment_contract(&staff(), false, due, date("2025-06-15")));
        assert!(!can_create_payment_contract(&staff(), false, due, date("2025-06-14")));
        assert!(can_create_payment_contract(&staff(), false, due, date("2025-06-16")));
    }

    #[test]
    fn administrator_bypasses_timing() {
        let due = date("2025-06-15");
        assert!(can_create_payment_contract(&admin(), false, due, date("2020-01-01")));
    }

    #[test]
    fn already_created_denies_everyone() {
        let due = date("2025-06-15");
        assert!(!can_create_payment_contract(&admin(), true, due, date("2025-06-15")));
        assert!(!can_create_payment_contract(&staff(), true, due, date("2025-12-31")));
    }
}
