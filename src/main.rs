mod config;

use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};

use rand::rngs::StdRng;
use rand::SeedableRng;

use lib_dagrad::nn::{Activation, Loss, Mlp, Sgd};
use lib_dagrad::viz::DotExt;
use lib_dagrad::{Graph, NodeId};

use config::Config;

const XOR: [([f64; 2], f64); 4] = [
  ([0.0, 0.0], 0.0),
  ([0.0, 1.0], 1.0),
  ([1.0, 0.0], 1.0),
  ([1.0, 1.0], 0.0),
];

fn main() -> Result<(), Box<dyn Error>> {
  env_logger::init();

  let config = Config::from_env()?;
  config.validate()?;
  log::debug!("{config:?}");

  scenario(&config)?;
  xor(&config)?;
  Ok(())
}

/// `s = 10 * (z + (z + x) * y + exp(y * z))` at x = 1, y = 2, z = 4
fn scenario(config: &Config) -> Result<(), Box<dyn Error>> {
  let mut graph = Graph::new();
  let x = graph.leaf(1.0)?;
  let y = graph.leaf(2.0)?;
  let z = graph.leaf(4.0)?;

  let mut temps: Vec<NodeId> = Vec::new();
  let zx = graph.add(z, x)?;
  temps.push(zx);
  let zxy = graph.multiply(zx, y)?;
  temps.push(zxy);
  let yz = graph.multiply(y, z)?;
  temps.push(yz);
  let e = graph.exponential(yz)?;
  temps.push(e);
  let left = graph.add(z, zxy)?;
  temps.push(left);
  let sum = graph.add(left, e)?;
  temps.push(sum);
  let s = graph.multiply_by_scalar(sum, 10.0)?;
  for id in temps {
    graph.release(id)?;
  }

  let visited = graph.backward(s)?;
  log::info!("s = {:.4} ({visited} nodes)", graph.value(s)?);
  for (name, id) in [("x", x), ("y", y), ("z", z)] {
    log::info!("ds/d{name} = {:.4}", graph.grad(id)?);
  }

  if let Some(path) = &config.dot_path {
    let mut out = BufWriter::new(File::create(path)?);
    graph.dot_builder(s).show_values(true).show_grads(true).dot(&mut out)?;
    out.flush()?;
    log::info!("wrote {}", path.display());
  }

  let reclaimed = graph.release(s)?;
  for id in [x, y, z] {
    graph.release(id)?;
  }
  log::debug!("scenario released ({reclaimed} nodes in the cascade, {} left)", graph.len());
  Ok(())
}

fn xor(config: &Config) -> Result<(), Box<dyn Error>> {
  let mut graph = Graph::new();
  let mut rng = StdRng::seed_from_u64(config.seed);
  let mlp = Mlp::new(
    &mut graph,
    2,
    &[config.hidden, 1],
    &[Activation::Tanh, Activation::Sigmoid],
    &mut rng,
  )?;
  let mut sgd = Sgd::new(config.learning_rate);

  for epoch in 0..config.epochs {
    let mut total = 0.0;
    for (x, target) in XOR {
      total += mlp.train_step(&mut graph, &x, &[target], Loss::BinaryCrossEntropy, &mut sgd)?;
    }
    if config.log_every > 0 && (epoch % config.log_every == 0 || epoch + 1 == config.epochs) {
      log::info!("epoch {epoch}: loss {:.6}", total / XOR.len() as f64);
    }
  }

  for (x, target) in XOR {
    let prediction = mlp.predict(&mut graph, &x)?;
    log::info!("{x:?} -> {prediction:.4?} (target {target})");
  }

  mlp.release(&mut graph)?;
  log::debug!("xor released, {} nodes left", graph.len());
  Ok(())
}
