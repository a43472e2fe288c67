use comms::msg::{Command, Msg, Payload};
use tokio::io;

#[tokio::test]
async fn send_recv_control() {
    const SIZE: usize = 128;

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    let msg = Msg::Control(Command::Welcome { world_size: 3 });
    tx.send(&msg).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let mut buf: Vec<u32> = Vec::new();
    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Control(cmd) => assert_eq!(cmd, Command::Welcome { world_size: 3 }),
        other => panic!("unexpected {}", other.kind()),
    }
}

#[tokio::test]
async fn send_recv_many_payloads_reusing_the_buffer() {
    const SIZE: usize = 1024;

    let (one, two) = io::duplex(SIZE);
    let (_, tx) = io::split(one);
    let (rx, _) = io::split(two);
    let (_, mut tx) = comms::channel(io::empty(), tx);
    let (mut rx, _) = comms::channel(rx, io::sink());

    let sender = tokio::spawn(async move {
        for i in 0..5 {
            let values: Vec<f32> = (0..=i).map(|x| x as f32 * 0.5).collect();
            tx.send(&Msg::Data(Payload::Reduced(&values))).await.unwrap();
        }
        tx.send(&Msg::Err("done".into())).await.unwrap();
    });

    let mut buf: Vec<u32> = Vec::new();
    for i in 0..5 {
        let expected: Vec<f32> = (0..=i).map(|x| x as f32 * 0.5).collect();
        match rx.recv_into(&mut buf).await.unwrap() {
            Msg::Data(Payload::Reduced(values)) => assert_eq!(values, expected.as_slice()),
            other => panic!("unexpected {}", other.kind()),
        }
    }

    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Err(detail) => assert_eq!(detail, "done"),
        other => panic!("unexpected {}", other.kind()),
    }

    sender.await.unwrap();
}

#[tokio::test]
async fn frames_over_the_limit_are_rejected() {
    let (one, two) = io::duplex(1024);
    let (_, tx) = io::split(one);
    let (rx, _) = io::split(two);
    let (_, mut tx) = comms::channel(io::empty(), tx);
    let (rx, _) = comms::channel(rx, io::sink());
    let mut rx = rx.with_max_frame_len(16);

    let values = [1f32; 8];
    tx.send(&Msg::Data(Payload::Gradient(&values))).await.unwrap();

    let mut buf: Vec<u32> = Vec::new();
    let err = rx.recv_into::<Msg, _>(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidData);
}
