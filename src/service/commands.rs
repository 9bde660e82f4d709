//! Command surface exposed to the UI bridge. Errors cross the bridge as strings.

use crate::{
    db::{DailySteps, Database},
    models::EpochKey,
    service::{ServiceSnapshot, StepPublisher},
    AppState,
};

fn publisher_from_state(state: &AppState) -> StepPublisher<Database> {
    state.publisher.clone()
}

pub async fn start_service(state: &AppState) -> Result<ServiceSnapshot, String> {
    let publisher = publisher_from_state(state);
    publisher.start().await.map_err(|e| e.to_string())
}

pub async fn stop_service(state: &AppState) -> Result<(), String> {
    let publisher = publisher_from_state(state);
    publisher.stop().await.map_err(|e| e.to_string())
}

pub async fn get_current_steps(state: &AppState) -> Result<u64, String> {
    let publisher = publisher_from_state(state);
    Ok(publisher.current_steps().await)
}

pub async fn reset_epoch(state: &AppState) -> Result<(), String> {
    let publisher = publisher_from_state(state);
    publisher.reset_epoch().await.map_err(|e| e.to_string())
}

pub async fn get_service_state(state: &AppState) -> Result<ServiceSnapshot, String> {
    let publisher = publisher_from_state(state);
    Ok(publisher.snapshot().await)
}

pub async fn get_weekly_steps(state: &AppState) -> Result<Vec<DailySteps>, String> {
    state.db.weekly_steps().await.map_err(|e| e.to_string())
}

/// `month` is `YYYY-MM`; defaults to the current month.
pub async fn get_monthly_total(state: &AppState, month: Option<String>) -> Result<u64, String> {
    let month = match month {
        Some(month) => month,
        None => {
            let boundary = state.settings.tracker().day_boundary;
            EpochKey::now(boundary).month().to_string()
        }
    };
    state
        .db
        .monthly_total(&month)
        .await
        .map_err(|e| e.to_string())
}

pub async fn set_daily_goal(state: &AppState, daily_goal: u64) -> Result<(), String> {
    state
        .settings
        .set_daily_goal(daily_goal)
        .map_err(|e| e.to_string())?;

    let publisher = publisher_from_state(state);
    publisher.update_settings(state.settings.tracker()).await;
    Ok(())
}
