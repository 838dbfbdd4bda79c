//! 目标与学习计划的输入校验，服务层在写入前调用。
use chrono::NaiveDate;

use crate::constants::{DISTRIBUTION_TOLERANCE, MAX_DAILY_MINUTES, MAX_GOAL_TITLE_LEN, MAX_SCHEDULE_NAME_LEN};
use crate::store::operations::goals::TargetMetrics;
use crate::store::operations::schedules::{ScheduleConfig, ScheduleType};

/// 标题非空且不超过 200 字符
pub fn validate_goal_title(title: &str) -> Result<(), String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err("goal title must not be empty".to_string());
    }
    if trimmed.chars().count() > MAX_GOAL_TITLE_LEN {
        return Err(format!("goal title must be at most {MAX_GOAL_TITLE_LEN} characters"));
    }
    Ok(())
}

pub fn validate_goal_dates(start: NaiveDate, target: NaiveDate) -> Result<(), String> {
    if target < start {
        return Err(format!(
            "target_date {target} must not be before start_date {start}"
        ));
    }
    Ok(())
}

fn finite_percent(value: f64, field: &str) -> Result<(), String> {
    if !value.is_finite() || value <= 0.0 || value > 100.0 {
        return Err(format!("{field} must be in (0, 100]"));
    }
    Ok(())
}

pub fn validate_target_metrics(metrics: &TargetMetrics) -> Result<(), String> {
    match metrics {
        TargetMetrics::VocabularyCount { target_words } => {
            if *target_words == 0 {
                return Err("targetWords must be > 0".to_string());
            }
        }
        TargetMetrics::QuizScore { target_score, topic } => {
            finite_percent(*target_score, "targetScore")?;
            if topic.as_deref().is_some_and(|t| t.trim().is_empty()) {
                return Err("topic must not be blank".to_string());
            }
        }
        TargetMetrics::ExamPreparation { target_score, topics } => {
            finite_percent(*target_score, "targetScore")?;
            if topics.iter().any(|t| t.trim().is_empty()) {
                return Err("topics must not contain blank entries".to_string());
            }
        }
        TargetMetrics::TimeBased { target_minutes } => {
            if *target_minutes == 0 {
                return Err("targetMinutes must be > 0".to_string());
            }
        }
        TargetMetrics::TopicMastery { topic, target_mastery } => {
            if topic.trim().is_empty() {
                return Err("topic must not be empty".to_string());
            }
            finite_percent(*target_mastery, "targetMastery")?;
        }
    }
    Ok(())
}

pub fn validate_schedule_name(name: &str) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("schedule name must not be empty".to_string());
    }
    if trimmed.chars().count() > MAX_SCHEDULE_NAME_LEN {
        return Err(format!(
            "schedule name must be at most {MAX_SCHEDULE_NAME_LEN} characters"
        ));
    }
    Ok(())
}

/// 校验配置：分钟数范围、权重和为 1、最小负载不超过最大负载，
/// 以及 days_per_week 与计划类型一致。
pub fn validate_schedule(
    schedule_type: &ScheduleType,
    config: &ScheduleConfig,
    min_daily_load: u32,
    max_daily_load: u32,
) -> Result<(), String> {
    if min_daily_load > max_daily_load {
        return Err(format!(
            "min_daily_load {min_daily_load} must not exceed max_daily_load {max_daily_load}"
        ));
    }
    if max_daily_load > MAX_DAILY_MINUTES {
        return Err(format!("max_daily_load must be at most {MAX_DAILY_MINUTES}"));
    }
    if config.daily_minutes == 0 {
        return Err("daily_minutes must be > 0".to_string());
    }
    if config.daily_minutes < min_daily_load || config.daily_minutes > max_daily_load {
        return Err(format!(
            "daily_minutes {} must be within [{min_daily_load}, {max_daily_load}]",
            config.daily_minutes
        ));
    }

    if !(1..=7).contains(&config.days_per_week) {
        return Err("days_per_week must be in [1,7]".to_string());
    }
    if let ScheduleType::Custom { study_days } = schedule_type {
        if study_days.is_empty() {
            return Err("custom schedule needs at least one study day".to_string());
        }
    }
    if schedule_type.days_per_week() != config.days_per_week {
        return Err(format!(
            "days_per_week {} does not match schedule type ({} days)",
            config.days_per_week,
            schedule_type.days_per_week()
        ));
    }

    let weights = &config.activity_distribution;
    let parts = [
        weights.flashcards,
        weights.quizzes,
        weights.reading,
        weights.practice,
    ];
    if parts.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err("activity_distribution weights must be non-negative".to_string());
    }
    if (weights.total() - 1.0).abs() > DISTRIBUTION_TOLERANCE {
        return Err(format!(
            "activity_distribution weights must sum to 1.0 (got {:.4})",
            weights.total()
        ));
    }

    if config.focus_areas.iter().any(|f| f.trim().is_empty()) {
        return Err("focus_areas must not contain blank entries".to_string());
    }
    Ok(())
}
