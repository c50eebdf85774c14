//! Running plans against the simulated robot.

use liquid_planner::catalog;
use liquid_planner::driver::mock::{CODE_INJECTED, CODE_NOT_INITIALIZED};
use liquid_planner::driver::{execute_leaves, CommandStatus, LiquidHandlingDriver};
use liquid_planner::instruction::terminal::*;
use liquid_planner::{
    Liquid, LiquidHandler, LiquidType, PlanError, RecordingDriver, Request, Scenario,
    TransferRequest, Volume, WellCoords, WellRef,
};
use tracing_test::traced_test;

const EPS: f64 = 1e-4;

fn handler_with_water() -> (LiquidHandler, String) {
    let mut deck = catalog::standard_deck();
    let mut src = catalog::pcr_plate_96("src");
    src.add_liquid(
        WellCoords::new(0, 0),
        Liquid::new("water", LiquidType::Water, Volume::ul(180.0)),
        EPS,
    )
    .unwrap();
    let dst = catalog::pcr_plate_96("dst");
    let dst_id = dst.id.clone();
    deck.add_plate("position_4", src).unwrap();
    deck.add_plate("position_8", dst).unwrap();
    (LiquidHandler::with_defaults(deck), dst_id)
}

fn transfer(dst: &str, x: usize, ul: f64) -> Request {
    Request::Transfer(
        TransferRequest::new(WellRef::new(dst, WellCoords::new(x, 0)))
            .with_component("water", Volume::ul(ul)),
    )
}

#[test]
#[traced_test]
fn plan_runs_cleanly_on_simulator() {
    let (handler, dst) = handler_with_water();
    let plan = handler
        .plan_requests(vec![transfer(&dst, 0, 30.0), transfer(&dst, 5, 45.0)])
        .unwrap();

    let mut driver = RecordingDriver::new();
    let executed = handler.execute(&plan, &mut driver).unwrap();

    assert_eq!(executed, plan.instructions.len());
    assert_eq!(driver.calls.first().map(String::as_str), Some("initialize"));
    assert_eq!(driver.calls.last().map(String::as_str), Some("finalize"));
    assert!(driver.dispensed.approx_eq(Volume::ul(75.0), EPS));
    assert!(!driver.is_initialized());
    assert!(logs_contain("driver executed"));
}

#[test]
#[traced_test]
fn driver_failure_stops_execution() {
    let (handler, dst) = handler_with_water();
    let plan = handler
        .plan_requests(vec![transfer(&dst, 0, 30.0)])
        .unwrap();
    let fail_at = plan
        .instructions
        .iter()
        .position(|i| i.kind() == "aspirate")
        .unwrap();

    let mut driver = RecordingDriver::failing_at(fail_at);
    let err = handler.execute(&plan, &mut driver).unwrap_err();
    match err {
        PlanError::DriverFailure {
            instruction, code, ..
        } => {
            assert_eq!(instruction, "aspirate");
            assert_eq!(code, CODE_INJECTED);
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(driver.calls.len(), fail_at + 1);
    assert_eq!(driver.dispensed, Volume::ZERO);
    assert!(logs_contain("driver rejected instruction"));
}

#[test]
fn demo_scenario_executes() {
    let scenario = Scenario::demo().unwrap();
    let handler = LiquidHandler::with_defaults(scenario.deck);
    let plan = handler.plan_requests(scenario.requests).unwrap();
    assert_eq!(plan.summary.messages, 1);
    assert_eq!(plan.of_kind("mix").count(), 1);

    let mut driver = RecordingDriver::new();
    handler.execute(&plan, &mut driver).unwrap();
    assert_eq!(driver.messages, vec!["column 1 filled".to_string()]);
    assert!(driver.dispensed.approx_eq(Volume::ul(400.0), EPS));
}

/// A driver that refuses everything, used through the trait object.
struct Offline;

impl LiquidHandlingDriver for Offline {
    fn initialize(&mut self) -> CommandStatus {
        CommandStatus::error(CODE_NOT_INITIALIZED, "robot offline")
    }
    fn finalize(&mut self) -> CommandStatus {
        CommandStatus::ok()
    }
    fn move_to(&mut self, _: &MoveCmd) -> CommandStatus {
        CommandStatus::ok()
    }
    fn aspirate(&mut self, _: &AspirateCmd) -> CommandStatus {
        CommandStatus::ok()
    }
    fn dispense(&mut self, _: &DispenseCmd) -> CommandStatus {
        CommandStatus::ok()
    }
    fn blowout(&mut self, _: &BlowoutCmd) -> CommandStatus {
        CommandStatus::ok()
    }
    fn mix(&mut self, _: &MixCmd) -> CommandStatus {
        CommandStatus::ok()
    }
    fn load_tips(&mut self, _: &LoadTipsCmd) -> CommandStatus {
        CommandStatus::ok()
    }
    fn unload_tips(&mut self, _: &UnloadTipsCmd) -> CommandStatus {
        CommandStatus::ok()
    }
    fn set_pipette_speed(&mut self, _: &SetPipetteSpeedCmd) -> CommandStatus {
        CommandStatus::ok()
    }
    fn set_drive_speed(&mut self, _: &SetDriveSpeedCmd) -> CommandStatus {
        CommandStatus::ok()
    }
    fn wait(&mut self, _: &WaitCmd) -> CommandStatus {
        CommandStatus::ok()
    }
    fn message(&mut self, _: &MessageCmd) -> CommandStatus {
        CommandStatus::ok()
    }
    fn reset_pistons(&mut self, _: &ResetPistonsCmd) -> CommandStatus {
        CommandStatus::ok()
    }
}

#[test]
fn trait_object_driver_rejects_first_call() {
    let (handler, dst) = handler_with_water();
    let plan = handler.plan_requests(vec![transfer(&dst, 0, 30.0)]).unwrap();
    let driver: &mut dyn LiquidHandlingDriver = &mut Offline;
    let err = execute_leaves(driver, &plan.instructions).unwrap_err();
    assert!(matches!(
        err,
        PlanError::DriverFailure {
            code: CODE_NOT_INITIALIZED,
            ..
        }
    ));
}
