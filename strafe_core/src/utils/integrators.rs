// strafe_core/src/utils/integrators.rs

use nalgebra::SVector;
use num_traits::Float;

/// A fixed-step ODE solver for `x_dot = f(x, t)` over a statically sized state.
pub trait Integrator<T, const N: usize> {
    fn step(
        &self,
        func: &dyn Fn(&SVector<T, N>, T) -> SVector<T, N>,
        x0: &SVector<T, N>,
        t0: T,
        tf: T,
    ) -> SVector<T, N>;
}

/// Classic fourth-order Runge-Kutta.
#[derive(Debug, Default, Clone, Copy)]
pub struct RK4;

impl<T, const N: usize> Integrator<T, N> for RK4
where
    T: Float + nalgebra::Scalar + nalgebra::ClosedAddAssign + nalgebra::ClosedMulAssign,
{
    fn step(
        &self,
        func: &dyn Fn(&SVector<T, N>, T) -> SVector<T, N>,
        x0: &SVector<T, N>,
        t0: T,
        tf: T,
    ) -> SVector<T, N> {
        let dt = tf - t0;
        let two = T::one() + T::one();
        let half_dt = dt / two;
        let sixth_dt = dt / (two + two + two);

        let k1 = func(x0, t0);
        let k2 = func(&(x0 + k1 * half_dt), t0 + half_dt);
        let k3 = func(&(x0 + k2 * half_dt), t0 + half_dt);
        let k4 = func(&(x0 + k3 * dt), tf);

        x0 + (k1 + k2 * two + k3 * two + k4) * sixth_dt
    }
}
