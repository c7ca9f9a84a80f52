use count_core::{CountedEvent, CountingLine, LineCounter, ObjectClass, TrackedDetection};

/// An object descending 12 px per frame from the top of the image.
fn falling_object(track_id: i64, class: ObjectClass, frame: u32) -> TrackedDetection {
    TrackedDetection {
        track_id,
        class,
        center: (320.0, frame as f32 * 12.0),
    }
}

#[test]
fn objects_descending_through_the_band_are_counted_once() {
    let mut counter = LineCounter::new(CountingLine::horizontal(10, 630, 240, 15));
    let mut events: Vec<CountedEvent> = Vec::new();

    // Track 1 falls through the band over several frames; track 2 stalls
    // well above it the whole time.
    for frame in 0..40 {
        let detections = vec![
            falling_object(1, ObjectClass::Bottle, frame),
            TrackedDetection {
                track_id: 2,
                class: ObjectClass::Can,
                center: (100.0, 80.0),
            },
        ];
        events.extend(counter.observe(&detections));
    }

    assert_eq!(
        events,
        vec![CountedEvent {
            class: ObjectClass::Bottle,
            track_id: 1,
        }]
    );
    let counts = counter.counts();
    assert_eq!((counts.bottles, counts.cans, counts.total), (1, 0, 1));
}

#[test]
fn a_rewound_run_counts_the_same_footage_again() {
    let mut counter = LineCounter::new(CountingLine::horizontal(10, 630, 240, 15));

    for pass in 0..2 {
        for frame in 0..40 {
            counter.observe(&[falling_object(1, ObjectClass::Bottle, frame)]);
        }
        if pass == 0 {
            assert_eq!(counter.counts().total, 1);
            // what the pipeline does when a loop-enabled source rewinds
            counter.reset();
        }
    }

    assert_eq!(counter.counts().total, 1);
}
