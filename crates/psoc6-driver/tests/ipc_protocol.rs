//! Cross-core pipe protocol tests
//!
//! Single-slot flow control and the copy-before-pending ordering of the
//! bottom half, exercised across real threads.

use psoc6_driver::ipc::Sender;
use psoc6_driver::{
    dispatcher, pipe, Direction, DriverError, Endpoint, Inbox, Message, Pending, RuntimeConfig,
    SlotState,
};
use psoc6_models::Image;
use std::sync::Arc;
use std::thread;

fn cm0_pipe() -> (Sender, Endpoint) {
    pipe(Direction::Cm0ToCm4, &RuntimeConfig::headless())
}

#[test]
fn test_single_slot_over_event_sequences() {
    // 's' = send attempt, 'r' = consumer services the slot
    let scripts = ["sssr", "srsrsr", "rssrr", "ssrssr", "srrrs"];

    for script in scripts {
        let (tx, mut ep) = cm0_pipe();
        let mut outstanding = false;
        let mut accepted = 0u64;

        for event in script.chars() {
            match event {
                's' => {
                    let result = tx.send_image(Image::sample());
                    if outstanding {
                        assert!(
                            matches!(result, Err(DriverError::SlotBusy { .. })),
                            "{script}: second send accepted while unreleased"
                        );
                    } else {
                        assert!(result.is_ok(), "{script}: send rejected on free slot");
                        outstanding = true;
                        accepted += 1;
                    }
                }
                'r' => {
                    let handled = ep.try_service().expect("sender alive");
                    assert_eq!(handled, outstanding, "{script}");
                    outstanding = false;
                }
                _ => unreachable!(),
            }
            assert_eq!(tx.is_ready(), !outstanding, "{script}");
        }
        assert_eq!(tx.counts().0, accepted, "{script}");
    }
}

#[test]
fn test_state_machine_transitions() {
    let (tx, mut ep) = cm0_pipe();
    assert_eq!(tx.state(), SlotState::Idle);
    tx.send_image(Image::sample()).unwrap();
    assert_eq!(tx.state(), SlotState::Sent);
    ep.service().unwrap();
    assert_eq!(tx.state(), SlotState::Released);
    tx.send_image(Image::sample()).unwrap();
    assert_eq!(tx.state(), SlotState::Sent);
}

#[test]
fn test_unreleased_slot_stays_blocked() {
    let (tx, _ep) = cm0_pipe();
    tx.send_image(Image::sample()).unwrap();
    for _ in 0..100 {
        assert!(matches!(
            tx.send_image(Image::sample()),
            Err(DriverError::SlotBusy { .. })
        ));
    }
    assert_eq!(tx.counts(), (1, 0));
}

#[test]
fn test_copy_visible_before_pending_flag() {
    const ROUNDS: u8 = 200;

    let (tx, mut ep) = cm0_pipe();
    let inbox = Arc::new(Inbox::new());
    ep.register_callback(Direction::Cm0ToCm4.client_id(), dispatcher(Arc::clone(&inbox)));

    let irq_inbox = Arc::clone(&inbox);
    let irq = thread::spawn(move || {
        ep.run();
        irq_inbox.close();
    });

    let poll_inbox = Arc::clone(&inbox);
    let poller = thread::spawn(move || {
        let mut local = Image::zeroed();
        let mut seen = 0u32;
        while poll_inbox.wait_into(&mut local).unwrap() == Pending::Image {
            // Every byte comes from the same send: a torn copy would mix fills.
            let fill = local.sentinel();
            assert!(
                local.as_bytes().iter().all(|&b| b == fill),
                "torn image observed"
            );
            seen += 1;
        }
        seen
    });

    for round in 1..=ROUNDS {
        assert!(tx.wait_ready());
        tx.send_image(Image::solid([round; 3])).unwrap();
    }
    assert!(tx.wait_ready());
    drop(tx);

    irq.join().unwrap();
    let seen = poller.join().unwrap();
    let (received, overwritten) = inbox.stats();
    assert_eq!(received, u64::from(ROUNDS));
    assert_eq!(u64::from(seen) + overwritten, received);
}

#[test]
fn test_release_happens_after_copy() {
    let (tx, mut ep) = cm0_pipe();
    let inbox = Arc::new(Inbox::new());
    ep.register_callback(Direction::Cm0ToCm4.client_id(), dispatcher(Arc::clone(&inbox)));

    let observed = Arc::clone(&inbox);
    tx.send_with_release(Message::new(tx.header(), Image::solid([7; 3])), move || {
        assert!(observed.is_pending(), "released before the copy landed");
    })
    .unwrap();
    ep.service().unwrap();
    assert!(tx.is_ready());
}

#[test]
fn test_wait_ready_reports_lost_peer() {
    let (tx, ep) = cm0_pipe();
    tx.send_image(Image::sample()).unwrap();
    drop(ep);
    assert!(!tx.wait_ready());
}
