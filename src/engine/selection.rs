use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::Config;
use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::opportunity::{AssignmentRequest, SelectionPolicy};
use crate::models::order::Order;
use crate::models::picker::{Picker, PickerStatus};

pub fn select_pickers<R: Rng + ?Sized>(
    request: &AssignmentRequest,
    registry: Vec<Picker>,
    order: &Order,
    config: &Config,
    rng: &mut R,
) -> Result<Vec<Picker>, AppError> {
    let registry: Vec<Picker> = registry
        .into_iter()
        .filter(|picker| {
            request
                .picker_type
                .is_none_or(|wanted| picker.picker_type == wanted)
        })
        .collect();

    match &request.policy {
        SelectionPolicy::Manual { picker_ids } => manual(picker_ids, registry),
        SelectionPolicy::AllEligible => {
            let mut eligible = available(registry);
            eligible.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(eligible)
        }
        SelectionPolicy::Nearby { radius_km } => {
            let radius = radius_km.unwrap_or(config.nearby_radius_km);
            if !radius.is_finite() || radius <= 0.0 {
                return Err(AppError::BadRequest("radius_km must be > 0".to_string()));
            }

            let mut nearby: Vec<(f64, Picker)> = available(registry)
                .into_iter()
                .map(|picker| (haversine_km(&picker.location, &order.pickup), picker))
                .filter(|(distance, _)| *distance <= radius)
                .collect();
            nearby.sort_by(|a, b| a.0.total_cmp(&b.0));
            Ok(nearby.into_iter().map(|(_, picker)| picker).collect())
        }
        SelectionPolicy::HighValue {
            min_completed,
            limit,
        } => {
            let min_completed = min_completed.unwrap_or(config.high_value_min_completed);
            let limit = limit.unwrap_or(config.high_value_limit);
            if limit == 0 {
                return Err(AppError::BadRequest("limit must be > 0".to_string()));
            }

            let mut experienced: Vec<Picker> = available(registry)
                .into_iter()
                .filter(|picker| picker.completed_deliveries >= min_completed)
                .collect();
            experienced.sort_by(|a, b| b.completed_deliveries.cmp(&a.completed_deliveries));
            experienced.truncate(limit);
            Ok(experienced)
        }
        SelectionPolicy::RandomSingle => {
            let eligible = available(registry);
            Ok(eligible.choose(rng).cloned().into_iter().collect())
        }
    }
}

fn available(registry: Vec<Picker>) -> Vec<Picker> {
    registry
        .into_iter()
        .filter(|picker| picker.status == PickerStatus::Available)
        .collect()
}

fn manual(picker_ids: &[uuid::Uuid], registry: Vec<Picker>) -> Result<Vec<Picker>, AppError> {
    if picker_ids.is_empty() {
        return Err(AppError::BadRequest("picker_ids cannot be empty".to_string()));
    }

    let mut seen = HashSet::new();
    let mut selected = Vec::with_capacity(picker_ids.len());
    for id in picker_ids {
        if !seen.insert(*id) {
            continue;
        }

        let picker = registry
            .iter()
            .find(|picker| picker.id == *id)
            .ok_or_else(|| AppError::NotFound(format!("picker {id} not found")))?;

        if picker.status == PickerStatus::Offline {
            tracing::debug!(picker_id = %id, "skipping offline picker in manual assignment");
            continue;
        }
        selected.push(picker.clone());
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    use super::select_pickers;
    use crate::config::Config;
    use crate::engine::testing::order_at;
    use crate::error::AppError;
    use crate::models::opportunity::{AssignmentRequest, SelectionPolicy};
    use crate::models::picker::{GeoPoint, Picker, PickerStatus, PickerType};

    fn picker(
        seed: u128,
        lat: f64,
        lng: f64,
        completed: u32,
        status: PickerStatus,
        picker_type: PickerType,
    ) -> Picker {
        Picker {
            id: Uuid::from_u128(seed),
            name: format!("picker-{seed}"),
            phone: "+2348000000000".to_string(),
            picker_type,
            location: GeoPoint { lat, lng },
            status,
            completed_deliveries: completed,
            updated_at: Utc::now(),
        }
    }

    fn registry() -> Vec<Picker> {
        vec![
            picker(1, 6.5245, 3.3793, 2, PickerStatus::Available, PickerType::Picker),
            picker(2, 6.6018, 3.3515, 40, PickerStatus::Available, PickerType::Picker),
            picker(3, 6.5250, 3.3800, 25, PickerStatus::Available, PickerType::StudentPicker),
            picker(4, 6.5244, 3.3792, 90, PickerStatus::Busy, PickerType::Picker),
            picker(5, 6.5244, 3.3792, 10, PickerStatus::Offline, PickerType::StudentPicker),
        ]
    }

    fn select(request: AssignmentRequest) -> Result<Vec<u128>, AppError> {
        let order = order_at(GeoPoint { lat: 6.5244, lng: 3.3792 });
        let mut rng = StdRng::seed_from_u64(7);
        select_pickers(&request, registry(), &order, &Config::default(), &mut rng)
            .map(|pickers| pickers.into_iter().map(|p| p.id.as_u128()).collect())
    }

    #[test]
    fn all_eligible_skips_busy_and_offline() {
        let ids = select(SelectionPolicy::AllEligible.into()).unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn nearby_filters_by_radius_and_orders_by_distance() {
        let ids = select(SelectionPolicy::Nearby { radius_km: Some(1.0) }.into()).unwrap();
        assert_eq!(ids, vec![1, 3]);

        let wide = select(SelectionPolicy::Nearby { radius_km: Some(50.0) }.into()).unwrap();
        assert_eq!(wide.len(), 3);
        assert_eq!(wide.last(), Some(&2));
    }

    #[test]
    fn nearby_rejects_non_positive_radius() {
        let err = select(SelectionPolicy::Nearby { radius_km: Some(0.0) }.into()).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn high_value_prefers_experienced_couriers() {
        let ids = select(
            SelectionPolicy::HighValue {
                min_completed: Some(20),
                limit: Some(1),
            }
            .into(),
        )
        .unwrap();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn random_single_returns_one_available_picker() {
        let ids = select(SelectionPolicy::RandomSingle.into()).unwrap();
        assert_eq!(ids.len(), 1);
        assert!([1, 2, 3].contains(&ids[0]));
    }

    #[test]
    fn picker_type_filter_applies_to_every_policy() {
        let ids = select(AssignmentRequest {
            policy: SelectionPolicy::AllEligible,
            picker_type: Some(PickerType::StudentPicker),
        })
        .unwrap();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn manual_allows_busy_but_not_offline_or_unknown() {
        let ids = select(
            SelectionPolicy::Manual {
                picker_ids: vec![Uuid::from_u128(4), Uuid::from_u128(5), Uuid::from_u128(4)],
            }
            .into(),
        )
        .unwrap();
        assert_eq!(ids, vec![4]);

        let err = select(
            SelectionPolicy::Manual {
                picker_ids: vec![Uuid::from_u128(99)],
            }
            .into(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
