#![no_main]

use libfuzzer_sys::fuzz_target;
use raftgate_statemachine::{CancellationToken, CounterStateMachine, StateMachine};

fuzz_target!(|data: &[u8]| {
    let stop = CancellationToken::new();
    let sm = CounterStateMachine::new(1, 1);

    // Restoring arbitrary bytes must never panic. A stream that restores
    // must survive a save and restore into a second replica unchanged.
    if sm.restore_from_snapshot(&mut &data[..], &stop).is_ok() {
        let mut saved = Vec::new();
        sm.save_snapshot(&mut saved, &stop).expect("save after restore");

        let replica = CounterStateMachine::new(1, 2);
        replica
            .restore_from_snapshot(&mut &saved[..], &stop)
            .expect("restore of a saved snapshot");
        assert_eq!(sm.len(), replica.len());
    }
});
