use systemair_save_driver::connection::memory::{Call, Failure, Memory, Unit};
use systemair_save_driver::device::{self, Device, FanModeRequest};
use systemair_save_driver::events::{Availability, ChangeEvent, DeviceEvent, EventBus, Scope};
use systemair_save_driver::registers::{Catalog, Group, MODBUS, TemporaryMode, Value, ZWAVE};
use systemair_save_driver::settings::Settings;
use systemair_save_driver::temporary_mode;
use std::time::Duration;
use tokio::sync::broadcast;

const MODE: &str = "REG_USERMODE_MODE";
const MODE_REQUEST: &str = "REG_USERMODE_HMI_CHANGE_REQUEST";
const FAN: &str = "REG_USERMODE_MANUAL_AIRFLOW_LEVEL_SAF";
const TARGET: &str = "REG_TC_SP";

fn n(x: f64) -> Value {
    Value::Number(x)
}

fn start(catalog: &'static Catalog) -> (Device, Unit, broadcast::Receiver<DeviceEvent>) {
    let (memory, unit) = Memory::new(catalog);
    let events = EventBus::new();
    let receiver = events.subscribe();
    let device = Device::start(memory, "unit".into(), Settings::default(), None, events);
    (device, unit, receiver)
}

fn modbus_unit() -> (Device, Unit, broadcast::Receiver<DeviceEvent>) {
    let (device, unit, receiver) = start(&MODBUS);
    unit.set(MODE, n(0.0));
    unit.set(FAN, n(3.0));
    unit.set(TARGET, n(21.0));
    (device, unit, receiver)
}

fn drain(receiver: &mut broadcast::Receiver<DeviceEvent>) -> Vec<ChangeEvent> {
    std::iter::from_fn(|| receiver.try_recv().ok()).map(|e| e.change).collect()
}

async fn pass(seconds: u64) {
    tokio::time::sleep(Duration::from_secs(seconds)).await;
}

#[tokio::test(start_paused = true)]
async fn chained_temporary_modes_restore_the_original_state() {
    let (device, unit, _events) = modbus_unit();
    device.refresh(Group::Operation).await;
    device.enter_temporary_mode(TemporaryMode::Fireplace, 10).await.unwrap();
    unit.set(MODE, n(4.0));
    device.enter_temporary_mode(TemporaryMode::Away, 2).await.unwrap();
    unit.set(MODE, n(5.0));
    assert!(matches!(
        device.temporary_mode(),
        temporary_mode::State::Active { mode: TemporaryMode::Away, .. }
    ));
    assert_eq!(device.snapshot().mode, Some(5));

    // The fireplace timer must not fire.
    pass(15 * 60).await;
    assert!(!unit.writes().contains(&(MODE_REQUEST, n(1.0))));

    pass(2 * 3600).await;
    assert_eq!(device.temporary_mode(), temporary_mode::State::Idle);
    let writes = unit.writes();
    assert_eq!(
        writes,
        vec![
            ("REG_USERMODE_FIREPLACE_TIME", n(10.0)),
            (MODE_REQUEST, n(5.0)),
            ("REG_USERMODE_AWAY_TIME", n(2.0)),
            (MODE_REQUEST, n(6.0)),
            (MODE_REQUEST, n(1.0)),
            (FAN, n(3.0)),
        ]
    );
    device.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn restoring_after_a_temporary_mode_pushes_the_next_poll_out() {
    let (memory, unit) = Memory::new(&MODBUS);
    unit.set(MODE, n(0.0));
    unit.set(FAN, n(3.0));
    unit.set(TARGET, n(21.0));
    let settings =
        Settings { polling_interval: Duration::from_secs(7).into(), ..Settings::default() };
    let device = Device::start(memory, "unit".into(), settings, None, EventBus::new());
    device.refresh(Group::Operation).await;
    device.enter_temporary_mode(TemporaryMode::Refresh, 1).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60_500)).await;
    assert_eq!(device.temporary_mode(), temporary_mode::State::Idle);
    assert_eq!(unit.writes().last(), Some(&(FAN, n(3.0))));
    unit.clear_calls();
    pass(5).await;
    let polls = unit
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::Read(ids) if ids.contains(&TARGET)))
        .count();
    assert_eq!(polls, 0);
    device.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn mode_changes_cancel_the_temporary_mode() {
    let (device, unit, _events) = modbus_unit();
    device.refresh(Group::Operation).await;
    device.enter_temporary_mode(TemporaryMode::Refresh, 30).await.unwrap();
    device.set_mode(1).await.unwrap();
    assert_eq!(device.temporary_mode(), temporary_mode::State::Idle);
    pass(3600).await;
    assert_eq!(unit.writes().last(), Some(&(MODE_REQUEST, n(2.0))));
    // Not requestable from the panel either.
    assert!(matches!(device.set_mode(12).await, Err(device::Error::Unsupported(_))));
}

#[tokio::test(start_paused = true)]
async fn local_writes_survive_stale_reads() {
    let (device, unit, mut events) = modbus_unit();
    device.refresh(Group::Operation).await;
    drain(&mut events);
    device.set_target_temperature(21.5).await.unwrap();
    assert_eq!(unit.get(TARGET), Some(n(21.5)));
    assert_eq!(drain(&mut events), vec![ChangeEvent::TargetTemperature { value: 21.5 }]);

    // The unit has not applied the change yet.
    unit.set(TARGET, n(21.0));
    device.refresh(Group::Operation).await;
    assert_eq!(device.snapshot().target_temperature, Some(21.5));
    assert_eq!(drain(&mut events), vec![]);

    pass(11).await;
    device.refresh(Group::Operation).await;
    assert_eq!(device.snapshot().target_temperature, Some(21.0));
    assert!(drain(&mut events).contains(&ChangeEvent::TargetTemperature { value: 21.0 }));
}

#[tokio::test(start_paused = true)]
async fn writes_are_clamped() {
    let (device, unit, _events) = modbus_unit();
    device.set_target_temperature(40.0).await.unwrap();
    assert_eq!(unit.get(TARGET), Some(n(30.0)));
    assert!(matches!(
        device.set_target_value("REG_SENSOR_OAT", n(1.0)).await,
        Err(device::Error::ReadOnly("REG_SENSOR_OAT"))
    ));
    assert!(matches!(
        device.set_target_value("REG_NOPE", n(1.0)).await,
        Err(device::Error::UnknownParameter(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn echoes_of_own_writes_are_ignored() {
    let (device, unit, mut events) = modbus_unit();
    device.refresh(Group::Operation).await;
    drain(&mut events);
    unit.push([(TARGET, n(25.0))], true);
    pass(1).await;
    assert_eq!(device.snapshot().target_temperature, Some(21.0));
    unit.set(TARGET, n(25.0));
    unit.push([(TARGET, n(25.0))], false);
    pass(1).await;
    assert_eq!(device.snapshot().target_temperature, Some(25.0));
    assert_eq!(drain(&mut events), vec![ChangeEvent::TargetTemperature { value: 25.0 }]);
}

#[tokio::test(start_paused = true)]
async fn alarms_are_raised_once_in_both_scopes() {
    let (device, unit, mut events) = modbus_unit();
    unit.set("REG_ALARM_FILTER_ALARM", n(0.0));
    device.refresh(Group::Alarm).await;
    assert!(!device.has_alarm(None));
    unit.set("REG_ALARM_FILTER_ALARM", n(1.0));
    drain(&mut events);
    device.refresh(Group::Alarm).await;
    device.refresh(Group::Alarm).await;
    let raised = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            ChangeEvent::AlarmRaised { scope, id, .. } => Some((scope, id)),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(
        raised,
        vec![(Scope::Any, "REG_ALARM_FILTER_ALARM"), (Scope::Specific, "REG_ALARM_FILTER_ALARM")]
    );
    assert!(device.has_alarm(None));
    assert!(device.has_alarm(Some("REG_ALARM_FILTER_ALARM")));
    assert!(!device.has_alarm(Some("REG_ALARM_EAT_ALARM")));
}

#[tokio::test(start_paused = true)]
async fn rejected_connections_stop_polling_until_reset() {
    let (device, unit, _events) = modbus_unit();
    unit.fail_next(Failure::Rejected);
    pass(30).await;
    assert!(matches!(device.availability(), Availability::Failed(_)));
    assert_eq!(unit.calls(), vec![Call::Connect]);
    assert!(matches!(
        device.set_target_temperature(22.0).await,
        Err(device::Error::Unavailable(_))
    ));

    device.reset_connection().await.unwrap();
    pass(2).await;
    assert_eq!(device.availability(), Availability::Available);
    assert_eq!(device.snapshot().target_temperature, Some(21.0));
}

#[tokio::test(start_paused = true)]
async fn refused_connections_keep_polling() {
    let (device, unit, _events) = modbus_unit();
    unit.fail_next(Failure::Refused);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(matches!(
        device.availability(),
        Availability::Unavailable(reason) if reason.contains("memory")
    ));
    pass(10).await;
    assert_eq!(device.availability(), Availability::Available);
}

#[tokio::test(start_paused = true)]
async fn fan_mode_can_go_back() {
    let (device, unit, _events) = modbus_unit();
    device.refresh(Group::Operation).await;
    assert!(matches!(
        device.set_fan_mode(FanModeRequest::Previous).await,
        Err(device::Error::Unsupported(_))
    ));
    device.set_fan_mode(FanModeRequest::Level(4)).await.unwrap();
    device.set_fan_mode(FanModeRequest::Previous).await.unwrap();
    assert_eq!(unit.writes(), vec![(FAN, n(4.0)), (FAN, n(3.0))]);
    assert_eq!(device.snapshot().previous_fan_mode, Some(4));
}

#[tokio::test(start_paused = true)]
async fn zwave_boost_is_a_switch() {
    let (device, unit, _events) = start(&ZWAVE);
    unit.set("boost", Value::Boolean(false));
    assert!(matches!(
        device.enter_temporary_mode(TemporaryMode::Away, 1).await,
        Err(device::Error::Unsupported(_))
    ));
    device.enter_temporary_mode(TemporaryMode::Boost, 30).await.unwrap();
    assert_eq!(unit.get("boost"), Some(Value::Boolean(true)));
    pass(30 * 60 + 1).await;
    assert_eq!(unit.get("boost"), Some(Value::Boolean(false)));
    assert_eq!(
        unit.writes(),
        vec![("boost", Value::Boolean(true)), ("boost", Value::Boolean(false))]
    );
}
