//! `citadel rollout` — staged rollout management and health reporting.

use citadel_rollout::{
    system_id, HealthReport, RolloutController, RolloutEvent, RolloutEventSink,
};
use citadel_transparency::TransparencyLog;
use clap::Subcommand;

use crate::probes::default_probes;
use crate::{CliResult, Context};

#[derive(Subcommand)]
pub enum RolloutCommand {
    /// Start a staged rollout
    Start {
        update_id: String,
        /// Operator description of the update
        update_info: String,
    },
    /// Check whether this node should receive the update
    Check { update_id: String },
    /// Run health probes and report for the rollout
    Health { update_id: String },
    /// Show rollout status
    Status { update_id: Option<String> },
    /// Manually trigger a rollback
    Rollback { update_id: String },
    /// Mark the rollout as complete
    Complete { update_id: String },
}

/// Publishes controller events into the transparency log.
struct TransparencySink(TransparencyLog);

impl RolloutEventSink for TransparencySink {
    fn record(&mut self, event: &RolloutEvent) {
        let health_status = event.health_status.map(|status| status.to_string());
        let result = self.0.record_rollout_event(
            &event.update_id,
            &event.kind.to_string(),
            event.stage.as_deref(),
            event.percentage,
            health_status.as_deref(),
        );
        if let Err(err) = result {
            tracing::error!(%err, "failed to record rollout event");
        }
    }
}

pub fn run(context: &Context, command: RolloutCommand) -> CliResult {
    let controller = RolloutController::open(&context.rollout_dir)?;
    let mut sink = TransparencySink(TransparencyLog::open(&context.log_dir)?);

    match command {
        RolloutCommand::Start {
            update_id,
            update_info,
        } => {
            controller.start_rollout(&update_id, &update_info, &mut sink)?;
            let stages = &controller.config().stages;
            println!("Started rollout for update: {update_id}");
            println!("Rollout stages: {}", stages.len());
            for (i, stage) in stages.iter().enumerate() {
                println!(
                    "  Stage {}: {} ({}% over {}h)",
                    i + 1,
                    stage.name,
                    stage.percentage,
                    stage.duration_hours
                );
            }
        }
        RolloutCommand::Check { update_id } => {
            let decision = controller.should_receive(&update_id, &system_id())?;
            println!("Update eligibility for {update_id}:");
            println!("  eligible: {}", decision.eligible);
            println!("  reason: {}", decision.reason);
            println!("  bucket: {}", decision.bucket);
            if let (Some(stage), Some(percentage)) = (&decision.stage, decision.stage_percentage) {
                println!("  current_stage: {stage} ({percentage}%)");
            }
        }
        RolloutCommand::Health { update_id } => {
            let report = HealthReport::collect(&default_probes());
            println!("Health check results:");
            println!("  Overall status: {}", report.overall_status);
            for (name, check) in &report.checks {
                println!("  {name}: {}", check.status);
            }

            let state = controller.report_health(&update_id, report, &mut sink)?;
            if state.rollback_triggered {
                println!("ROLLBACK TRIGGERED - update rollout has been stopped");
            }
        }
        RolloutCommand::Status { update_id } => {
            match controller.rollout_status(update_id.as_deref())? {
                Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                None => println!("No active rollout"),
            }
        }
        RolloutCommand::Rollback { update_id } => {
            controller.trigger_rollback(&update_id, &mut sink)?;
            println!("ROLLBACK TRIGGERED - update rollout has been stopped");
        }
        RolloutCommand::Complete { update_id } => {
            controller.complete_rollout(&update_id, &mut sink)?;
            println!("Rollout complete: {update_id}");
        }
    }
    Ok(())
}
