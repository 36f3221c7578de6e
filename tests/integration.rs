// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end scenarios: the primitives wired up the way an audio app
//! would use them, with a DSP-style thread on one side and UI-style
//! threads on the other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use rtshare::{Fifo, NonRealtimeMutatable, PushError, RealtimeMutatable};

/// Biquad filter coefficients, the classic shared-with-the-callback value.
#[derive(Clone, Copy, Debug, PartialEq)]
struct BiquadCoeffs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl BiquadCoeffs {
    fn passthrough() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    fn splat(v: f32) -> Self {
        Self {
            b0: v,
            b1: v,
            b2: v,
            a1: v,
            a2: v,
        }
    }
}

/// One block of the direct-form-II-transposed biquad.
fn process_block(coeffs: &BiquadCoeffs, state: &mut (f32, f32), buffer: &mut [f32]) {
    let (mut lv1, mut lv2) = *state;
    for sample in buffer.iter_mut() {
        let input = *sample;
        let output = input * coeffs.b0 + lv1;
        lv1 = input * coeffs.b1 - output * coeffs.a1 + lv2;
        lv2 = input * coeffs.b2 - output * coeffs.a2;
        *sample = output;
    }
    *state = (lv1, lv2);
}

#[test]
fn coefficient_handoff_to_the_callback() {
    let (mut dsp, ui) = NonRealtimeMutatable::new(BiquadCoeffs::passthrough()).split();

    // First callback sees the initial coefficients.
    {
        let coeffs = dsp.read();
        assert_eq!(coeffs.b0, 1.0);

        let mut buffer = [1.0f32, 0.0, 0.0, 0.0];
        process_block(&coeffs, &mut (0.0, 0.0), &mut buffer);
        assert_eq!(buffer[0], 1.0);
    }

    // UI installs a gentle lowpass while the callback is between blocks.
    {
        let mut coeffs = ui.write();
        coeffs.b0 = 0.5;
        coeffs.b1 = 0.5;
    }

    // Next callback picks the new set up.
    let coeffs = dsp.read();
    assert_eq!(coeffs.b0, 0.5);
    assert_eq!(coeffs.b1, 0.5);
    assert_eq!(coeffs.b2, 0.0);
}

#[test]
fn hammered_writers_never_tear_the_callback_read() {
    let (mut dsp, ui) = NonRealtimeMutatable::new(BiquadCoeffs::splat(0.0)).split();
    let done = Arc::new(AtomicBool::new(false));

    let callback = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut state = (0.0, 0.0);
            let mut buffer = [0.0f32; 64];
            while !done.load(Ordering::Relaxed) {
                let coeffs = dsp.read();
                let c = *coeffs;
                assert!(
                    c.b0 == c.b1 && c.b1 == c.b2 && c.b2 == c.a1 && c.a1 == c.a2,
                    "coefficients from different writers mixed: {:?}",
                    c
                );
                process_block(&coeffs, &mut state, &mut buffer);
            }
        })
    };

    let writers: Vec<_> = (1..=4)
        .map(|w| {
            let ui = ui.clone();
            thread::spawn(move || {
                for i in 0..1000 {
                    ui.replace(BiquadCoeffs::splat((w * 10_000 + i) as f32));
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Relaxed);
    callback.join().unwrap();
}

#[test]
fn playhead_reported_back_to_the_ui() {
    let (mut dsp, ui) = RealtimeMutatable::new(0u64).split();

    // Three callbacks, a UI poll after each.
    for block in 1..=3u64 {
        {
            let mut playhead = dsp.write();
            *playhead = block * 512;
        }
        assert_eq!(*ui.read(), block * 512);
    }

    assert_eq!(ui.get(), 3 * 512);
}

#[test]
fn event_queue_respects_capacity_and_order() {
    #[derive(Debug, PartialEq)]
    struct Event {
        offset: u32,
        value: f32,
    }

    let fifo = Fifo::with_capacity(8);

    for i in 0..10u32 {
        let result = fifo.push(Box::new(Event {
            offset: i,
            value: i as f32 * 0.125,
        }));
        if i < 8 {
            assert!(result.is_ok(), "event {} should be queued", i);
        } else {
            assert!(result.is_err(), "event {} should be rejected", i);
        }
    }

    for i in 0..8u32 {
        let event = fifo.pop().expect("eight events were queued");
        assert_eq!(event.offset, i);
    }
    assert!(fifo.pop().is_none());
}

#[test]
fn event_queue_loses_and_duplicates_nothing() {
    const COUNT: u64 = 20_000;
    let fifo = Arc::new(Fifo::with_capacity(16));

    let producer = {
        let fifo = Arc::clone(&fifo);
        thread::spawn(move || {
            for i in 0..COUNT {
                let mut event = Box::new(i);
                loop {
                    match fifo.push(event) {
                        Ok(()) => break,
                        Err(PushError(back)) => {
                            event = back;
                            thread::yield_now();
                        }
                    }
                }
            }
        })
    };

    let mut sum = 0u64;
    let mut received = 0u64;
    let mut last: Option<u64> = None;
    while received < COUNT {
        match fifo.pop() {
            Some(event) => {
                if let Some(prev) = last {
                    assert!(*event > prev, "out of order: {} after {}", event, prev);
                }
                last = Some(*event);
                sum += *event;
                received += 1;
            }
            None => thread::yield_now(),
        }
    }
    producer.join().unwrap();

    assert_eq!(received, COUNT);
    assert_eq!(sum, COUNT * (COUNT - 1) / 2);
    assert!(fifo.pop().is_none());
}
