use std::fs::File;
use std::io::BufWriter;
use std::time::SystemTime;

use memory_stats::memory_stats;
use tracing_flame::FlameLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;
use transmap::{Configuration, Manager, Reflected};

fn setup_global_subscriber() -> impl Drop {
	let file = File::create("./trace.folded").unwrap();
	let flame_layer = FlameLayer::new(BufWriter::new(file)).with_file_and_line(false);
	let guard = flame_layer.flush_on_drop();

	let subscriber = Registry::default()
		.with(flame_layer);

	tracing::subscriber::set_global_default(subscriber).expect("Could not set global default");
	guard
}

#[derive(Debug, Clone, Default, Reflected)]
struct Order {
	id: i64,
	customer: String,
	quantity: i32,
	note: Option<String>,
	prices: Vec<i32>,
}

#[derive(Debug, Clone, Default, Reflected)]
struct OrderDto {
	id: i64,
	customer: String,
	quantity: i64,
	note: Option<String>,
	prices: Box<[i64]>,
}

fn main() {
	let _guard = setup_global_subscriber();

	let mut start = SystemTime::now();
	let configuration = Configuration::new();
	let mapper = Manager::default_instance().get::<Order, OrderDto>(&configuration).unwrap();

	println! {
		"Mapper build time: {:?}, RAM: {}MB",
		start.elapsed().unwrap(),
		memory_stats().unwrap().virtual_mem as f32 / 1000000.0,
	}

	start = SystemTime::now();

	let order = Order {
		id: 7,
		customer: "acme".to_string(),
		quantity: 3,
		note: None,
		prices: vec![120, 80, 40],
	};

	let mut mapped_elements = 0usize;
	for _ in 0..1_000_000 {
		let dto = mapper.map_value(&order).unwrap();
		mapped_elements += dto.prices.len();
	}

	println! {
		"Mapping time: {:?}, elements: {}, RAM: {}MB",
		start.elapsed().unwrap(),
		mapped_elements,
		memory_stats().unwrap().virtual_mem as f32 / 1000000.0,
	}
}
