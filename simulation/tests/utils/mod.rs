use simulation::brickfem::assembly::{assemble_applied_forces, assemble_mass_matrix, compute_elastic_energy};
use simulation::brickfem::element::Brick9Settings;
use simulation::brickfem::nalgebra::{DVector, Vector3};
use simulation::brickfem::{Brick9Element, Material, NodeHandle};
use simulation::Simulation;

/// Poor man's approx assertion for matrices
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let diff = $x - $y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {}", $tol);
            println!("left: {}", $x);
            println!("right: {}", $y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

pub struct Plate {
    pub simulation: Simulation,
    /// Top corner node at `(lx, ly, lz)`.
    pub tip: NodeHandle,
}

/// Builds a simulation of a single layer of `nx` x `ny` bricks spanning `[0, lx] x [0, ly] x [0, lz]`.
///
/// `fixed(i, j, layer)` decides which corner nodes are fixed.
pub fn plate_simulation(
    nx: usize,
    ny: usize,
    size: Vector3<f64>,
    material: Material,
    settings: Brick9Settings,
    fixed: impl Fn(usize, usize, usize) -> bool,
) -> Plate {
    let mut simulation = Simulation::new();
    let material = simulation.add_material(material).unwrap();
    let (dx, dy) = (size.x / nx as f64, size.y / ny as f64);
    let num_x = nx + 1;
    let num_xy = num_x * (ny + 1);

    let mut nodes = Vec::new();
    for layer in 0..2 {
        for j in 0..=ny {
            for i in 0..=nx {
                let position = Vector3::new(i as f64 * dx, j as f64 * dy, layer as f64 * size.z);
                nodes.push(simulation.add_node(position, fixed(i, j, layer)).unwrap());
            }
        }
    }

    for j in 0..ny {
        for i in 0..nx {
            let n0 = j * num_x + i;
            let bottom = [n0, n0 + 1, n0 + 1 + num_x, n0 + num_x];
            let mut corners = [nodes[0]; 8];
            for (k, index) in bottom.iter().enumerate() {
                corners[k] = nodes[*index];
                corners[k + 4] = nodes[*index + num_xy];
            }
            let curvature = simulation.add_curvature_node().unwrap();
            let element = Brick9Element::new(corners, curvature, Vector3::new(dx, dy, size.z))
                .with_material(material)
                .with_settings(settings.clone());
            simulation.add_element(element).unwrap();
        }
    }

    let tip = nodes[2 * num_xy - 1];
    Plate { simulation, tip }
}

pub fn free_positions(simulation: &Simulation) -> DVector<f64> {
    let mesh = simulation.mesh();
    let mut x = DVector::zeros(mesh.num_free_dofs());
    mesh.gather_positions_into(x.as_view_mut()).unwrap();
    x
}

pub fn free_velocities(simulation: &Simulation) -> DVector<f64> {
    let mesh = simulation.mesh();
    let mut v = DVector::zeros(mesh.num_free_dofs());
    mesh.gather_velocities_into(v.as_view_mut()).unwrap();
    v
}

/// Kinetic plus elastic energy minus the work done by the applied loads since `x0`.
pub fn total_energy(simulation: &Simulation, x0: &DVector<f64>) -> f64 {
    let mesh = simulation.mesh();
    let mass = assemble_mass_matrix(mesh).unwrap();
    let v = free_velocities(simulation);
    let kinetic = 0.5 * v.dot(&(&mass * &v));
    let elastic = compute_elastic_energy(mesh).unwrap().unwrap();
    let forces = assemble_applied_forces(mesh, &simulation.gravity()).unwrap();
    let work = forces.dot(&(free_positions(simulation) - x0));
    kinetic + elastic - work
}
