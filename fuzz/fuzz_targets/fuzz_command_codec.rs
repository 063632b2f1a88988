#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use raftgate_statemachine::{Command, CounterStateMachine, ReadQuery, StateMachine, Verb};

#[derive(Arbitrary, Debug)]
struct Input<'a> {
    raw: &'a [u8],
    verb: u8,
    key: String,
    body: Vec<u8>,
}

fuzz_target!(|input: Input| {
    // Decoding arbitrary bytes must never panic, and whatever decodes
    // re-encodes to something that decodes to the same command.
    if let Ok(command) = Command::decode(input.raw) {
        let again = Command::decode(&command.encode()).expect("re-encoded command must decode");
        assert_eq!(command, again);
    }
    let _ = ReadQuery::decode(input.raw);

    // Applying arbitrary bytes either fails cleanly or leaves a readable state.
    let sm = CounterStateMachine::new(1, 1);
    let _ = sm.apply(input.raw);

    let verb = match input.verb % 5 {
        0 => Verb::Post,
        1 => Verb::Put,
        2 => Verb::Patch,
        3 => Verb::Delete,
        _ => Verb::Other("TRACE".into()),
    };
    if let Ok(command) = Command::new(verb, input.key.clone()) {
        let command = command.with_body(input.body);
        let decoded = Command::decode(&command.encode()).expect("encoded command must decode");
        assert_eq!(command.verb, decoded.verb);
        assert_eq!(command.key, decoded.key);
        assert_eq!(command.body, decoded.body);

        if let Ok(query) = ReadQuery::new(input.key) {
            let value = sm.query(&query.encode()).expect("valid query must succeed");
            assert!(std::str::from_utf8(&value).is_ok_and(|v| v.parse::<u64>().is_ok()));
        }
    }
});
