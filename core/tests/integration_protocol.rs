// Integration test: reference timing protocol against the relay
//
// The same encoded message is decoded three ways: straight from the sender's
// schedule, over a real loopback UDP socket, and after passing through an
// offline relay pipeline. Only the last one should lose information.

use ctguard_core::protocol::{
    bitstream_from_message, TimingDecoder, TimingEncoder, TrialMetrics, TrialSummary,
};
use ctguard_core::simulation::{apply_jitter, simulate_relay};
use ctguard_core::{FlowPipeline, GuardConfig, RelayClock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;
use tokio::net::UdpSocket;

fn decode(decoder: &mut TimingDecoder, trace: &[ctguard_core::Timestamp]) -> Option<String> {
    trace.iter().filter_map(|t| decoder.on_arrival(*t)).next()
}

#[test]
fn test_unrelayed_channel_is_error_free() {
    let encoder = TimingEncoder::new(0.3, 0.9, 5).unwrap();
    let bits = bitstream_from_message("ok");
    let mut rng = StdRng::seed_from_u64(42);
    let trace = apply_jitter(&encoder.arrival_trace(&bits).unwrap(), Duration::from_millis(20), &mut rng);

    let mut decoder = TimingDecoder::new(0.3, 0.3, 5, bits.len()).unwrap();
    let received = decode(&mut decoder, &trace).expect("full bitstream decoded");

    let metrics = TrialMetrics::measure(&bits, &received, encoder.transmission_time(&bits).unwrap());
    assert_eq!(metrics.errors, 0);
    assert!(metrics.capacity_bps > 0.0);
    println!("✓ Direct channel: BER {:.2}, {:.3} bit/s", metrics.bit_error_rate, metrics.capacity_bps);
}

#[test]
fn test_relay_degrades_channel() {
    let encoder = TimingEncoder::new(0.3, 0.9, 5).unwrap();
    let bits = bitstream_from_message("covert");
    let trace = encoder.arrival_trace(&bits).unwrap();
    let elapsed = encoder.transmission_time(&bits).unwrap();

    let mut summary = TrialSummary::new();
    for seed in 0..5 {
        let mut pipeline = FlowPipeline::with_seed(&GuardConfig::default(), seed).unwrap();
        let report = simulate_relay(&mut pipeline, &trace);
        assert!(report.sessions() > 0);

        let mut decoder = TimingDecoder::new(0.3, 0.3, 5, bits.len()).unwrap();
        let received = decode(&mut decoder, &report.departures).unwrap_or_default();
        let relayed_elapsed = elapsed + report.added_latency(&trace);
        summary.record(TrialMetrics::measure(&bits, &received, relayed_elapsed));
    }

    assert_eq!(summary.len(), 5);
    assert!(summary.mean_bit_error_rate() > 0.1);
    println!(
        "✓ Relayed channel: mean BER {:.2}, mean capacity {:.3} bit/s",
        summary.mean_bit_error_rate(),
        summary.mean_capacity_bps()
    );
}

#[tokio::test]
async fn test_loopback_udp_transmission() {
    let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let receiver_addr = receiver.local_addr().unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let encoder = TimingEncoder::new(0.02, 0.08, 3).unwrap();
    let bits = "10110010";
    let delays = encoder.schedule(bits).unwrap();

    let listen = tokio::spawn(async move {
        let clock = RelayClock::new();
        let mut decoder = TimingDecoder::new(0.02, 0.03, 3, 8).unwrap();
        let mut buf = [0u8; 64];
        loop {
            let (_, from) = receiver.recv_from(&mut buf).await.unwrap();
            if let Some(stream) = decoder.on_arrival(clock.now()) {
                receiver.send_to(stream.as_bytes(), from).await.unwrap();
                return stream;
            }
        }
    });

    for (i, delay) in delays.iter().enumerate() {
        sender
            .send_to(format!("bit:{}", i).as_bytes(), receiver_addr)
            .await
            .unwrap();
        tokio::time::sleep(*delay).await;
    }

    let mut buf = [0u8; 64];
    let (len, _) = tokio::time::timeout(Duration::from_secs(5), sender.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let echoed = String::from_utf8_lossy(&buf[..len]).to_string();
    assert_eq!(listen.await.unwrap(), echoed);
    assert_eq!(echoed, bits);
    println!("✓ Loopback echo: {}", echoed);
}
