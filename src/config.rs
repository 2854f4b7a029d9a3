//! Run configuration
//!
//! Every tunable threshold and rate lives in [`Params`]. A run builds one
//! immutable value by layering defaults, caller overrides and a bounds pass,
//! then passes it by reference into every computation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ComputeError;
use crate::types::Baselines;

/// Engine parameters, serialized in camelCase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Params {
    /// Nominal sampling interval (minutes)
    pub epoch_minutes: f64,
    /// Starting reserve (0..100)
    #[serde(rename = "initialBB")]
    pub initial_bb: f64,
    pub saturation_exponent: f64,
    pub max_delta_per_hour: f64,
    /// Timestamp gaps above `max_dt_factor * epoch_minutes` fall back to the nominal length
    pub max_dt_factor: f64,
    pub min_charge_scale: f64,
    pub min_drain_scale: f64,
    pub confidence_floor: f64,

    pub base_sleep_charge_per_hour: f64,
    pub base_rest_charge_per_hour: f64,
    pub base_mind_charge_per_hour: f64,

    pub load_drain_workout_max_per_hour: f64,
    pub load_drain_high_activity_max_per_hour: f64,
    pub load_drain_active_max_per_hour: f64,
    /// Weight of heart-rate effort in WORKOUT load intensity
    pub workout_hr_weight: f64,

    // Activity sub-classifier
    pub activity_hr_effort_weight: f64,
    pub activity_high_effort01: f64,
    pub activity_active_effort01: f64,
    pub activity_light_effort01: f64,
    pub awake_rest_min_score01: f64,

    pub stress_drain_per_index_per_hour: f64,
    pub stress_drain_max_per_hour: f64,
    pub anom_drain_per_index_per_hour: f64,
    pub anom_drain_max_per_hour: f64,

    // State of mind / HRV strain
    pub som_priority_weight: f64,
    pub som_low_mood_start01: f64,
    pub som_low_mood_full01: f64,
    pub som_high_stress_start01: f64,
    pub som_high_stress_full01: f64,
    pub som_stress_index_max: f64,
    pub mind_strain_from_hrv_start_z: f64,
    pub mind_strain_from_hrv_full_z: f64,
    pub mind_comfort_penalty_max_points: f64,

    // Wrist temperature
    pub temp_onset_window_minutes: f64,
    pub temp_onset_beneficial_min_c: f64,
    pub temp_onset_beneficial_max_c: f64,
    pub temp_onset_benefit_max_boost: f64,
    pub temp_overheat_start_c: f64,
    pub temp_overheat_scale_c: f64,
    pub temp_fever_start_c: f64,
    pub temp_fever_scale_c: f64,
    pub temp_sustained_heat_minutes: f64,
    pub temp_sustained_heat_multiplier_max: f64,
    pub temp_anom_weight: f64,

    pub comfort_penalty_per_index: f64,
    pub fatigue_drain_per_hour_for100: f64,

    // Post-activity calm recovery
    pub post_activity_recovery_window_minutes: f64,
    pub post_activity_recovery_max_minutes: f64,
    pub post_activity_recovery_charge_max_per_hour: f64,
    pub post_activity_recovery_min_activity_intensity01: f64,
    pub post_activity_recovery_max_movement_intensity01: f64,
    pub post_activity_recovery_hr_drop_bpm_per_min_for_max: f64,
    pub post_activity_recovery_hrv_rise_z_for_max: f64,
    pub post_activity_recovery_energy_drop_kcal_per_min_for_max: f64,
    pub post_activity_recovery_steps_drop_per_min_for_max: f64,
    pub post_activity_recovery_min_index: f64,
    pub post_activity_recovery_stress_suppression_power: f64,
    pub post_activity_recovery_stress_suppression_min_factor: f64,

    /// Wake gaps up to this long are merged into one sleep session
    pub sleep_session_max_gap_minutes: f64,

    // Missing-vitals imputation
    pub impute_missing_vitals: bool,
    pub impute_quality_at_freshness: f64,
    pub impute_hr_max_gap_minutes: f64,
    pub impute_hrv_max_gap_minutes: f64,
    pub impute_spo2_max_gap_minutes: f64,
    pub impute_rr_max_gap_minutes: f64,
    pub impute_temp_max_gap_minutes: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            epoch_minutes: 5.0,
            initial_bb: 70.0,
            saturation_exponent: 0.5,
            max_delta_per_hour: 25.0,
            max_dt_factor: 3.0,
            min_charge_scale: 0.25,
            min_drain_scale: 0.25,
            confidence_floor: 0.15,

            base_sleep_charge_per_hour: 9.0,
            base_rest_charge_per_hour: 2.0,
            base_mind_charge_per_hour: 4.0,

            load_drain_workout_max_per_hour: 35.0,
            load_drain_high_activity_max_per_hour: 26.0,
            load_drain_active_max_per_hour: 18.0,
            workout_hr_weight: 1.0,

            activity_hr_effort_weight: 0.8,
            activity_high_effort01: 0.6,
            activity_active_effort01: 0.25,
            activity_light_effort01: 0.05,
            awake_rest_min_score01: 0.5,

            stress_drain_per_index_per_hour: 4.0,
            stress_drain_max_per_hour: 14.0,
            anom_drain_per_index_per_hour: 2.5,
            anom_drain_max_per_hour: 10.0,

            som_priority_weight: 0.75,
            som_low_mood_start01: 0.45,
            som_low_mood_full01: 0.2,
            som_high_stress_start01: 0.6,
            som_high_stress_full01: 0.9,
            som_stress_index_max: 1.2,
            mind_strain_from_hrv_start_z: 0.4,
            mind_strain_from_hrv_full_z: 1.6,
            mind_comfort_penalty_max_points: 8.0,

            temp_onset_window_minutes: 60.0,
            temp_onset_beneficial_min_c: 0.05,
            temp_onset_beneficial_max_c: 0.45,
            temp_onset_benefit_max_boost: 0.12,
            temp_overheat_start_c: 0.35,
            temp_overheat_scale_c: 0.35,
            temp_fever_start_c: 0.9,
            temp_fever_scale_c: 0.5,
            temp_sustained_heat_minutes: 180.0,
            temp_sustained_heat_multiplier_max: 1.6,
            temp_anom_weight: 0.9,

            comfort_penalty_per_index: 12.0,
            fatigue_drain_per_hour_for100: 40.0,

            post_activity_recovery_window_minutes: 90.0,
            post_activity_recovery_max_minutes: 45.0,
            post_activity_recovery_charge_max_per_hour: 4.0,
            post_activity_recovery_min_activity_intensity01: 0.25,
            post_activity_recovery_max_movement_intensity01: 0.15,
            post_activity_recovery_hr_drop_bpm_per_min_for_max: 3.0,
            post_activity_recovery_hrv_rise_z_for_max: 0.8,
            post_activity_recovery_energy_drop_kcal_per_min_for_max: 6.0,
            post_activity_recovery_steps_drop_per_min_for_max: 60.0,
            post_activity_recovery_min_index: 0.12,
            post_activity_recovery_stress_suppression_power: 2.0,
            post_activity_recovery_stress_suppression_min_factor: 0.08,

            sleep_session_max_gap_minutes: 90.0,

            impute_missing_vitals: true,
            impute_quality_at_freshness: 0.8,
            impute_hr_max_gap_minutes: 15.0,
            impute_hrv_max_gap_minutes: 60.0,
            impute_spo2_max_gap_minutes: 60.0,
            impute_rr_max_gap_minutes: 60.0,
            impute_temp_max_gap_minutes: 90.0,
        }
    }
}

/// Finite value clamped into range, or the fallback when non-finite.
fn bounded(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

impl Params {
    /// Apply documented bounds. Never fails; out-of-range values are clamped.
    pub fn validated(mut self) -> Self {
        let d = Params::default();
        self.epoch_minutes = bounded(self.epoch_minutes, 0.5, 24.0 * 60.0, d.epoch_minutes);
        self.initial_bb = bounded(self.initial_bb, 0.0, 100.0, d.initial_bb);
        self.saturation_exponent = bounded(self.saturation_exponent, 0.1, 2.0, d.saturation_exponent);
        self.max_delta_per_hour = bounded(self.max_delta_per_hour, 0.0, 200.0, d.max_delta_per_hour);
        self.max_dt_factor = bounded(self.max_dt_factor, 1.0, 48.0, d.max_dt_factor);
        self.min_charge_scale = bounded(self.min_charge_scale, 0.0, 1.0, d.min_charge_scale);
        self.min_drain_scale = bounded(self.min_drain_scale, 0.0, 1.0, d.min_drain_scale);
        self.confidence_floor = bounded(self.confidence_floor, 0.0, 1.0, d.confidence_floor);

        for (value, default) in [
            (&mut self.base_sleep_charge_per_hour, d.base_sleep_charge_per_hour),
            (&mut self.base_rest_charge_per_hour, d.base_rest_charge_per_hour),
            (&mut self.base_mind_charge_per_hour, d.base_mind_charge_per_hour),
            (&mut self.load_drain_workout_max_per_hour, d.load_drain_workout_max_per_hour),
            (&mut self.load_drain_high_activity_max_per_hour, d.load_drain_high_activity_max_per_hour),
            (&mut self.load_drain_active_max_per_hour, d.load_drain_active_max_per_hour),
            (&mut self.stress_drain_per_index_per_hour, d.stress_drain_per_index_per_hour),
            (&mut self.stress_drain_max_per_hour, d.stress_drain_max_per_hour),
            (&mut self.anom_drain_per_index_per_hour, d.anom_drain_per_index_per_hour),
            (&mut self.anom_drain_max_per_hour, d.anom_drain_max_per_hour),
            (&mut self.post_activity_recovery_charge_max_per_hour, d.post_activity_recovery_charge_max_per_hour),
        ] {
            *value = bounded(*value, 0.0, 200.0, default);
        }
        self.workout_hr_weight = bounded(self.workout_hr_weight, 0.0, 3.0, d.workout_hr_weight);

        self.activity_hr_effort_weight = bounded(self.activity_hr_effort_weight, 0.0, 2.0, d.activity_hr_effort_weight);
        self.activity_light_effort01 = bounded(self.activity_light_effort01, 0.0, 1.0, d.activity_light_effort01);
        self.activity_active_effort01 = bounded(
            self.activity_active_effort01,
            self.activity_light_effort01,
            1.0,
            d.activity_active_effort01,
        );
        self.activity_high_effort01 = bounded(
            self.activity_high_effort01,
            self.activity_active_effort01,
            1.0,
            d.activity_high_effort01,
        );
        self.awake_rest_min_score01 = bounded(self.awake_rest_min_score01, 0.0, 1.0, d.awake_rest_min_score01);

        self.som_priority_weight = bounded(self.som_priority_weight, 0.0, 1.0, d.som_priority_weight);
        self.som_low_mood_start01 = bounded(self.som_low_mood_start01, 0.0, 1.0, d.som_low_mood_start01);
        self.som_low_mood_full01 = bounded(self.som_low_mood_full01, 0.0, 1.0, d.som_low_mood_full01);
        self.som_high_stress_start01 = bounded(self.som_high_stress_start01, 0.0, 1.0, d.som_high_stress_start01);
        self.som_high_stress_full01 = bounded(self.som_high_stress_full01, 0.0, 1.0, d.som_high_stress_full01);
        self.som_stress_index_max = bounded(self.som_stress_index_max, 0.0, 5.0, d.som_stress_index_max);
        self.mind_strain_from_hrv_start_z = bounded(self.mind_strain_from_hrv_start_z, 0.0, 4.0, d.mind_strain_from_hrv_start_z);
        self.mind_strain_from_hrv_full_z = bounded(
            self.mind_strain_from_hrv_full_z,
            self.mind_strain_from_hrv_start_z + 1e-6,
            6.0,
            d.mind_strain_from_hrv_full_z,
        );
        self.mind_comfort_penalty_max_points =
            bounded(self.mind_comfort_penalty_max_points, 0.0, 30.0, d.mind_comfort_penalty_max_points);

        self.temp_onset_window_minutes = bounded(self.temp_onset_window_minutes, 15.0, 180.0, d.temp_onset_window_minutes);
        self.temp_onset_beneficial_min_c = bounded(self.temp_onset_beneficial_min_c, -1.0, 2.0, d.temp_onset_beneficial_min_c);
        self.temp_onset_beneficial_max_c = bounded(
            self.temp_onset_beneficial_max_c,
            self.temp_onset_beneficial_min_c,
            3.0,
            d.temp_onset_beneficial_max_c,
        );
        self.temp_onset_benefit_max_boost = bounded(self.temp_onset_benefit_max_boost, 0.0, 0.5, d.temp_onset_benefit_max_boost);
        self.temp_overheat_start_c = bounded(self.temp_overheat_start_c, 0.0, 5.0, d.temp_overheat_start_c);
        self.temp_overheat_scale_c = bounded(self.temp_overheat_scale_c, 0.05, 5.0, d.temp_overheat_scale_c);
        self.temp_fever_start_c = bounded(self.temp_fever_start_c, 0.0, 5.0, d.temp_fever_start_c);
        self.temp_fever_scale_c = bounded(self.temp_fever_scale_c, 0.05, 5.0, d.temp_fever_scale_c);
        self.temp_sustained_heat_minutes = bounded(self.temp_sustained_heat_minutes, 30.0, 600.0, d.temp_sustained_heat_minutes);
        self.temp_sustained_heat_multiplier_max =
            bounded(self.temp_sustained_heat_multiplier_max, 1.0, 3.0, d.temp_sustained_heat_multiplier_max);
        self.temp_anom_weight = bounded(self.temp_anom_weight, 0.0, 3.0, d.temp_anom_weight);

        self.comfort_penalty_per_index = bounded(self.comfort_penalty_per_index, 0.0, 50.0, d.comfort_penalty_per_index);
        self.fatigue_drain_per_hour_for100 =
            bounded(self.fatigue_drain_per_hour_for100, 1e-6, 500.0, d.fatigue_drain_per_hour_for100);

        self.post_activity_recovery_window_minutes =
            bounded(self.post_activity_recovery_window_minutes, 15.0, 240.0, d.post_activity_recovery_window_minutes);
        self.post_activity_recovery_max_minutes =
            bounded(self.post_activity_recovery_max_minutes, 5.0, 180.0, d.post_activity_recovery_max_minutes);
        self.post_activity_recovery_min_activity_intensity01 = bounded(
            self.post_activity_recovery_min_activity_intensity01,
            0.0,
            1.0,
            d.post_activity_recovery_min_activity_intensity01,
        );
        self.post_activity_recovery_max_movement_intensity01 = bounded(
            self.post_activity_recovery_max_movement_intensity01,
            0.0,
            1.0,
            d.post_activity_recovery_max_movement_intensity01,
        );
        self.post_activity_recovery_hr_drop_bpm_per_min_for_max = bounded(
            self.post_activity_recovery_hr_drop_bpm_per_min_for_max,
            0.5,
            60.0,
            d.post_activity_recovery_hr_drop_bpm_per_min_for_max,
        );
        self.post_activity_recovery_hrv_rise_z_for_max = bounded(
            self.post_activity_recovery_hrv_rise_z_for_max,
            0.2,
            10.0,
            d.post_activity_recovery_hrv_rise_z_for_max,
        );
        self.post_activity_recovery_energy_drop_kcal_per_min_for_max = bounded(
            self.post_activity_recovery_energy_drop_kcal_per_min_for_max,
            0.5,
            100.0,
            d.post_activity_recovery_energy_drop_kcal_per_min_for_max,
        );
        self.post_activity_recovery_steps_drop_per_min_for_max = bounded(
            self.post_activity_recovery_steps_drop_per_min_for_max,
            5.0,
            1000.0,
            d.post_activity_recovery_steps_drop_per_min_for_max,
        );
        self.post_activity_recovery_min_index =
            bounded(self.post_activity_recovery_min_index, 0.0, 1.0, d.post_activity_recovery_min_index);
        self.post_activity_recovery_stress_suppression_power = bounded(
            self.post_activity_recovery_stress_suppression_power,
            1.0,
            4.0,
            d.post_activity_recovery_stress_suppression_power,
        );
        self.post_activity_recovery_stress_suppression_min_factor = bounded(
            self.post_activity_recovery_stress_suppression_min_factor,
            0.0,
            1.0,
            d.post_activity_recovery_stress_suppression_min_factor,
        );

        self.sleep_session_max_gap_minutes =
            bounded(self.sleep_session_max_gap_minutes, 0.0, 12.0 * 60.0, d.sleep_session_max_gap_minutes);

        self.impute_quality_at_freshness =
            bounded(self.impute_quality_at_freshness, 0.0, 0.95, d.impute_quality_at_freshness);
        for (value, default) in [
            (&mut self.impute_hr_max_gap_minutes, d.impute_hr_max_gap_minutes),
            (&mut self.impute_hrv_max_gap_minutes, d.impute_hrv_max_gap_minutes),
            (&mut self.impute_spo2_max_gap_minutes, d.impute_spo2_max_gap_minutes),
            (&mut self.impute_rr_max_gap_minutes, d.impute_rr_max_gap_minutes),
            (&mut self.impute_temp_max_gap_minutes, d.impute_temp_max_gap_minutes),
        ] {
            *value = bounded(*value, 0.0, 24.0 * 60.0, default);
        }

        self
    }

    /// Layer a partial camelCase override object onto these params.
    pub fn with_overrides(&self, overrides: &Value) -> Result<Self, ComputeError> {
        let Value::Object(patch) = overrides else {
            return Err(ComputeError::config("params", "expected an object"));
        };
        let mut merged = serde_json::to_value(self).map_err(|e| ComputeError::config("params", e))?;
        if let Value::Object(base) = &mut merged {
            for (key, value) in patch {
                if value.is_null() {
                    continue;
                }
                base.insert(key.clone(), value.clone());
            }
        }
        serde_json::from_value(merged).map_err(|e| ComputeError::config("params", e))
    }

    pub fn epoch_hours(&self) -> f64 {
        self.epoch_minutes / 60.0
    }
}

fn default_true() -> bool {
    true
}

/// Behavioral baseline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BehaviorBaselineConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Observation window length from the first timestamp (days)
    pub days: f64,
    pub min_sleep_bout_minutes: f64,
    pub min_workout_bout_minutes: f64,
    pub min_sleep_samples: usize,
    pub min_workout_samples: usize,
    pub sleep_sigma_floor_hours: f64,
    pub sleep_sigma_ceiling_hours: f64,
    pub workout_sigma_floor: f64,
    pub workout_sigma_ceiling: f64,
    pub sleep_absolute_min_hours: f64,
    pub sleep_healthy_min_hours: f64,
    pub sleep_target_hours: f64,
    pub sleep_typicality_blend: f64,
    pub sleep_scale_min: f64,
    pub sleep_scale_max: f64,
    pub workout_scale_per_sigma: f64,
    pub workout_scale_min: f64,
    pub workout_scale_max: f64,
}

impl Default for BehaviorBaselineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            days: 10.0,
            min_sleep_bout_minutes: 180.0,
            min_workout_bout_minutes: 10.0,
            min_sleep_samples: 5,
            min_workout_samples: 3,
            sleep_sigma_floor_hours: 0.5,
            sleep_sigma_ceiling_hours: 3.0,
            workout_sigma_floor: 0.05,
            workout_sigma_ceiling: 0.5,
            sleep_absolute_min_hours: 4.0,
            sleep_healthy_min_hours: 7.0,
            sleep_target_hours: 8.0,
            sleep_typicality_blend: 0.5,
            sleep_scale_min: 0.4,
            sleep_scale_max: 1.1,
            workout_scale_per_sigma: 0.15,
            workout_scale_min: 0.7,
            workout_scale_max: 1.4,
        }
    }
}

impl BehaviorBaselineConfig {
    pub fn validated(mut self) -> Self {
        let d = Self::default();
        self.days = bounded(self.days, 1.0, 60.0, d.days);
        self.min_sleep_bout_minutes = bounded(self.min_sleep_bout_minutes, 0.0, 24.0 * 60.0, d.min_sleep_bout_minutes);
        self.min_workout_bout_minutes =
            bounded(self.min_workout_bout_minutes, 0.0, 24.0 * 60.0, d.min_workout_bout_minutes);
        self.min_sleep_samples = self.min_sleep_samples.max(1);
        self.min_workout_samples = self.min_workout_samples.max(1);
        self.sleep_sigma_floor_hours = bounded(self.sleep_sigma_floor_hours, 0.05, 12.0, d.sleep_sigma_floor_hours);
        self.sleep_sigma_ceiling_hours = bounded(
            self.sleep_sigma_ceiling_hours,
            self.sleep_sigma_floor_hours,
            24.0,
            d.sleep_sigma_ceiling_hours,
        );
        self.workout_sigma_floor = bounded(self.workout_sigma_floor, 0.005, 1.0, d.workout_sigma_floor);
        self.workout_sigma_ceiling =
            bounded(self.workout_sigma_ceiling, self.workout_sigma_floor, 1.0, d.workout_sigma_ceiling);
        self.sleep_absolute_min_hours = bounded(self.sleep_absolute_min_hours, 0.0, 12.0, d.sleep_absolute_min_hours);
        self.sleep_healthy_min_hours = bounded(
            self.sleep_healthy_min_hours,
            self.sleep_absolute_min_hours,
            14.0,
            d.sleep_healthy_min_hours,
        );
        self.sleep_target_hours = bounded(self.sleep_target_hours, self.sleep_healthy_min_hours, 16.0, d.sleep_target_hours);
        self.sleep_typicality_blend = bounded(self.sleep_typicality_blend, 0.0, 1.0, d.sleep_typicality_blend);
        self.sleep_scale_min = bounded(self.sleep_scale_min, 0.0, 1.0, d.sleep_scale_min);
        self.sleep_scale_max = bounded(self.sleep_scale_max, 1.0, 2.0, d.sleep_scale_max);
        self.workout_scale_per_sigma = bounded(self.workout_scale_per_sigma, 0.0, 1.0, d.workout_scale_per_sigma);
        self.workout_scale_min = bounded(self.workout_scale_min, 0.1, 1.0, d.workout_scale_min);
        self.workout_scale_max = bounded(self.workout_scale_max, 1.0, 3.0, d.workout_scale_max);
        self
    }
}

/// Three-kernel hybrid settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThreeKernelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub weight_core: f64,
    pub weight_trend: f64,
    /// Length of the synthetic forecast tail (hours)
    pub forecast_hours: f64,
    pub min_train_samples: usize,
    pub hidden_units: usize,
    pub train_epochs: usize,
    pub learning_rate: f64,
    pub learning_rate_decay: f64,
    pub l2: f64,
    pub seed: u32,
    pub time_bins: usize,
    pub laplace_alpha: f64,
}

impl Default for ThreeKernelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weight_core: 0.9,
            weight_trend: 0.1,
            forecast_hours: 0.0,
            min_train_samples: 200,
            hidden_units: 12,
            train_epochs: 40,
            learning_rate: 0.05,
            learning_rate_decay: 0.95,
            l2: 1e-4,
            seed: 1337,
            time_bins: 48,
            laplace_alpha: 1.0,
        }
    }
}

impl ThreeKernelConfig {
    /// Bounds pass; kernel weights are normalized to sum 1.
    pub fn validated(mut self) -> Self {
        let d = Self::default();
        let wc = bounded(self.weight_core, 0.0, 1.0, d.weight_core);
        let wt = bounded(self.weight_trend, 0.0, 1.0, d.weight_trend);
        let sum = wc + wt;
        if sum > 0.0 {
            self.weight_core = wc / sum;
            self.weight_trend = wt / sum;
        } else {
            self.weight_core = d.weight_core;
            self.weight_trend = d.weight_trend;
        }
        self.forecast_hours = bounded(self.forecast_hours, 0.0, 168.0, 0.0);
        self.min_train_samples = self.min_train_samples.max(1);
        self.hidden_units = self.hidden_units.clamp(1, 32);
        self.train_epochs = self.train_epochs.min(500);
        self.learning_rate = bounded(self.learning_rate, 1e-6, 1.0, d.learning_rate);
        self.learning_rate_decay = bounded(self.learning_rate_decay, 0.5, 1.0, d.learning_rate_decay);
        self.l2 = bounded(self.l2, 0.0, 0.1, d.l2);
        self.time_bins = self.time_bins.clamp(4, 288);
        self.laplace_alpha = bounded(self.laplace_alpha, 0.0, 100.0, d.laplace_alpha);
        self
    }
}

/// Everything one run needs besides the epochs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    pub params: Params,
    /// Caller baselines; inferred from the epochs when absent
    pub baselines: Option<Baselines>,
    pub behavior_baseline: Option<BehaviorBaselineConfig>,
    pub three_kernel: Option<ThreeKernelConfig>,
}

impl RunConfig {
    /// Validate every section; disabled optional sections collapse to `None`.
    pub fn validated(self) -> Self {
        Self {
            params: self.params.validated(),
            baselines: self.baselines,
            behavior_baseline: self
                .behavior_baseline
                .filter(|c| c.enabled)
                .map(BehaviorBaselineConfig::validated),
            three_kernel: self
                .three_kernel
                .filter(|c| c.enabled)
                .map(ThreeKernelConfig::validated),
        }
    }
}
